//! `bulwark harden`: run the hardening pipeline on one existing instance.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use bulwark_common::PipelineStatus;
use clap::Args;

use crate::app::{self, AppContext};
use crate::application::services::hardening::CancelToken;
use crate::application::services::orchestrator::DeploymentOrchestrator;
use crate::commands::{cancel_on_ctrl_c, exit_code};
use crate::domain::PlanError;
use crate::infra::config::load_plan;

#[derive(Args)]
pub struct HardenArgs {
    /// Deployment plan that describes the instance (YAML)
    pub plan: PathBuf,

    /// Instance to harden
    #[arg(long)]
    pub instance: String,

    /// Public address to use instead of asking the provider
    #[arg(long)]
    pub address: Option<String>,
}

/// Run the harden command.
///
/// # Errors
///
/// Returns an error if the plan is invalid or does not name the instance.
/// A failed run is rendered and reported through the exit code.
pub async fn run(app: &AppContext, args: &HardenArgs) -> Result<ExitCode> {
    let plan = load_plan(&args.plan)?;
    plan.resolve()?;
    let target = plan
        .find(&args.instance)
        .ok_or_else(|| PlanError::UnknownInstance(args.instance.clone()))?;
    let port = target.profile.resolve().management_port.unwrap_or_default();

    let prompt = format!(
        "Harden '{}'? Its management channel moves to port {port}.",
        args.instance
    );
    if !app.confirm(&prompt, true)? {
        app.output.info("Hardening cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

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
    cancel_on_ctrl_c(&cancel);
    let run = orchestrator
        .harden_instance(&plan, &args.instance, args.address.as_deref(), &cancel)
        .await?;
    app.renderer().render_run(&run)?;
    Ok(exit_code(run.status == PipelineStatus::Succeeded))
}
