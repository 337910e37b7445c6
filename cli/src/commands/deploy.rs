//! `bulwark deploy`: provision, harden and configure every host in a plan.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use crate::app::{self, AppContext};
use crate::application::services::hardening::CancelToken;
use crate::application::services::orchestrator::DeploymentOrchestrator;
use crate::commands::{cancel_on_ctrl_c, exit_code};
use crate::infra::config::load_plan;

#[derive(Args)]
pub struct DeployArgs {
    /// Deployment plan (YAML)
    pub plan: PathBuf,

    /// Validate the plan and print the effects without contacting anything
    #[arg(long)]
    pub dry_run: bool,
}

/// Run the deploy command.
///
/// # Errors
///
/// Returns an error if the plan cannot be read or is invalid. Phase failures
/// are reported in the rendered result and the exit code.
pub async fn run(app: &AppContext, args: &DeployArgs) -> Result<ExitCode> {
    let plan = load_plan(&args.plan)?;
    let config = app.config()?;
    let stack = app.stack(&config)?;
    let reporter = app.reporter();
    let orchestrator = DeploymentOrchestrator::new(
        &stack.tracker,
        &stack.executor,
        &stack.probe,
        &stack.store,
        &reporter,
        app::deploy_options(&config),
    );

    let cancel = CancelToken::new();
    if args.dry_run {
        let result = orchestrator.deploy(&plan, true, &cancel).await?;
        app.renderer().render_deployment(&result)?;
        return Ok(ExitCode::SUCCESS);
    }

    // Reject an invalid plan before asking anything.
    plan.resolve()?;
    let prompt = format!(
        "Deploy '{}' ({} instances)? A failed deployment is rolled back.",
        plan.name,
        plan.instances.len()
    );
    if !app.confirm(&prompt, true)? {
        app.output.info("Deployment cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    cancel_on_ctrl_c(&cancel);
    let result = orchestrator.deploy(&plan, false, &cancel).await?;
    app.renderer().render_deployment(&result)?;
    Ok(exit_code(result.succeeded()))
}
