//! `bulwark status`: how far an instance got and whether it still answers.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::application::services::status::instance_status;
use crate::domain::instance::validate_instance_name;

#[derive(Args)]
pub struct StatusArgs {
    /// Instance name
    pub instance: String,
}

/// Run the status command. Sends no mutating command to the host.
///
/// # Errors
///
/// Returns an error if the instance name is invalid or was never hardened.
pub async fn run(app: &AppContext, args: &StatusArgs) -> Result<ExitCode> {
    validate_instance_name(&args.instance)?;
    let config = app.config()?;
    let stack = app.stack(&config)?;
    let report = instance_status(
        &stack.store,
        &stack.executor,
        &args.instance,
        config.timeouts.command(),
    )
    .await?
    .ok_or_else(|| anyhow::anyhow!("no hardening run recorded for '{}'", args.instance))?;
    app.renderer().render_status(&report)?;
    Ok(ExitCode::SUCCESS)
}
