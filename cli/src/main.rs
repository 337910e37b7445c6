//! Bulwark CLI - Lockout-safe hardening and deployment of cloud hosts

use std::process::ExitCode;

use bulwark_cli::cli::Cli;
use bulwark_cli::domain::{ConfigError, PlanError, ProfileError};
use bulwark_cli::output::json::format_error;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Stable error code for `--json` consumers.
fn error_code(error: &anyhow::Error) -> &'static str {
    if error.downcast_ref::<PlanError>().is_some() {
        "INVALID_PLAN"
    } else if error.downcast_ref::<ProfileError>().is_some() {
        "INVALID_PROFILE"
    } else if error.downcast_ref::<ConfigError>().is_some() {
        "INVALID_CONFIG"
    } else {
        "ERROR"
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so `--json` stdout stays machine-readable.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("BULWARK_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();
    let json = cli.json;
    match cli.run().await {
        Ok(code) => code,
        Err(e) => {
            let message = format!("{e:#}");
            match format_error(&message, error_code(&e)) {
                Ok(obj) if json => println!("{obj}"),
                _ => eprintln!("Error: {message}"),
            }
            ExitCode::FAILURE
        }
    }
}
