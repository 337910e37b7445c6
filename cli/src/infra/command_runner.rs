//! Infrastructure implementation of the `CommandRunner` port.
//!
//! `TokioCommandRunner` drives the `aws` and `ssh` binaries. Every run is
//! bounded: on timeout the child is killed explicitly rather than left to
//! `kill_on_drop`, so no process outlives its budget.

use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tracing::debug;

use crate::application::ports::CommandRunner;

/// Default budget for a single provider CLI call.
pub const DEFAULT_CMD_TIMEOUT: Duration = Duration::from_secs(60);

/// A child process exceeded its budget and was killed.
///
/// Returned inside `anyhow::Error`; callers that need to tell timeouts from
/// other failures downcast to it.
#[derive(Debug, Error)]
#[error("{program} timed out after {}s", timeout.as_secs())]
pub struct CommandTimeout {
    pub program: String,
    pub timeout: Duration,
}

pub struct TokioCommandRunner {
    timeout: Duration,
}

impl TokioCommandRunner {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn spawn(program: &str, args: &[&str], with_stdin: bool) -> Result<Child> {
        debug!(program, ?args, "spawning");
        tokio::process::Command::new(program)
            .args(args)
            .stdin(if with_stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))
    }

    /// Feed `input`, collect output, and kill the child if `timeout` fires first.
    async fn drive(program: &str, mut child: Child, input: Option<Vec<u8>>, timeout: Duration) -> Result<Output> {
        let stdin_handle = child.stdin.take();
        let mut stdout_handle = child.stdout.take();
        let mut stderr_handle = child.stderr.take();

        tokio::select! {
            result = async {
                let (status, stdout, stderr, ()) = tokio::join!(
                    child.wait(),
                    async {
                        let mut buf = Vec::new();
                        if let Some(ref mut h) = stdout_handle {
                            let _ = h.read_to_end(&mut buf).await;
                        }
                        buf
                    },
                    async {
                        let mut buf = Vec::new();
                        if let Some(ref mut h) = stderr_handle {
                            let _ = h.read_to_end(&mut buf).await;
                        }
                        buf
                    },
                    async move {
                        if let (Some(mut stdin), Some(bytes)) = (stdin_handle, input) {
                            let _ = stdin.write_all(&bytes).await;
                            // Dropping stdin closes it so the child sees EOF.
                        }
                    },
                );
                Ok(Output {
                    status: status.with_context(|| format!("waiting for {program}"))?,
                    stdout,
                    stderr,
                })
            } => result,
            () = tokio::time::sleep(timeout) => {
                let _ = child.kill().await;
                Err(CommandTimeout { program: program.to_string(), timeout }.into())
            }
        }
    }
}

impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        self.run_with_timeout(program, args, self.timeout).await
    }

    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Output> {
        let child = Self::spawn(program, args, false)?;
        Self::drive(program, child, None, timeout).await
    }

    async fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        stdin: &[u8],
        timeout: Duration,
    ) -> Result<Output> {
        let child = Self::spawn(program, args, true)?;
        Self::drive(program, child, Some(stdin.to_vec()), timeout).await
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captures_output() {
        let runner = TokioCommandRunner::new(Duration::from_secs(5));
        let out = runner.run("sh", &["-c", "echo hi; echo err >&2"]).await.unwrap();
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout), "hi\n");
        assert_eq!(String::from_utf8_lossy(&out.stderr), "err\n");
    }

    #[tokio::test]
    async fn test_stdin_is_piped_and_closed() {
        let runner = TokioCommandRunner::new(Duration::from_secs(5));
        let out = runner
            .run_with_stdin("sh", &["-s"], b"echo from-stdin\n", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout), "from-stdin\n");
    }

    #[tokio::test]
    async fn test_timeout_is_typed() {
        let runner = TokioCommandRunner::new(Duration::from_secs(5));
        let err = runner
            .run_with_timeout("sleep", &["5"], Duration::from_millis(50))
            .await
            .unwrap_err();
        let timeout = err.downcast_ref::<CommandTimeout>().expect("typed timeout");
        assert_eq!(timeout.program, "sleep");
    }
}
