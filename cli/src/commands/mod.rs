//! Command implementations

pub mod compile;
pub mod config;
pub mod deploy;
pub mod harden;
pub mod status;
pub mod version;

use std::process::ExitCode;

use crate::application::services::hardening::CancelToken;

/// Exit code for a run or deployment that ended without success.
pub const EXIT_FAILED: u8 = 1;

/// Cancel `token` on the first Ctrl-C.
///
/// Cancellation takes effect at the next stage boundary and is refused once
/// a host's management channel has moved.
pub(crate) fn cancel_on_ctrl_c(token: &CancelToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        match token.cancel() {
            Ok(()) => eprintln!("Cancelling at the next stage boundary..."),
            Err(refused) => eprintln!("{refused}"),
        }
    });
}

pub(crate) fn exit_code(succeeded: bool) -> ExitCode {
    if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILED)
    }
}
