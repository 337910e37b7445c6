//! Infrastructure implementation of the `RemoteExecutor` port over `ssh`.
//!
//! Each batch is one `ssh` invocation in batch mode. The commands travel as a
//! script on stdin; every command is followed by a guard that reports its
//! index on stderr and exits, so a failed batch says where it stopped.
//!
//! Invocations for the same user, host and port share one master connection
//! (`ControlMaster`), so a run opens few new connections against the host's
//! rate-limited management port. Batches marked `fresh_session` bypass it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::application::ports::{CommandRunner, RemoteExecutor};
use crate::domain::{BatchOutcome, CommandBatch, ConnectionContext, ExecError};
use crate::infra::command_runner::CommandTimeout;

const FAILURE_MARKER: &str = "__bulwark_failed__:";
/// `ssh` reserves this exit status for its own errors.
const SSH_TRANSPORT_EXIT: i32 = 255;
/// Idle time before a shared master connection closes.
const CONTROL_PERSIST_SECS: u64 = 120;

pub struct SshExecutor<R> {
    runner: R,
    known_hosts: PathBuf,
    /// Socket template for shared connections; `%C` hashes user, host and port.
    control_path: PathBuf,
}

impl<R: CommandRunner> SshExecutor<R> {
    /// Executor pinning host keys in `~/.bulwark/known_hosts`.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined or the
    /// bulwark directory cannot be created.
    pub fn new(runner: R) -> Result<Self> {
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        let dir = home.join(".bulwark");
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))
                .with_context(|| format!("setting permissions on {}", dir.display()))?;
        }
        Ok(Self::with_known_hosts(runner, dir.join("known_hosts")))
    }

    /// Executor pinning host keys in `known_hosts`; shared-connection sockets
    /// live next to it.
    #[must_use]
    pub fn with_known_hosts(runner: R, known_hosts: PathBuf) -> Self {
        let control_path = known_hosts
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("cm-%C");
        Self {
            runner,
            known_hosts,
            control_path,
        }
    }

    fn args(&self, context: &ConnectionContext, fresh_session: bool) -> Vec<String> {
        let remote_shell = if context.credential.user == "root" {
            "sh -s"
        } else {
            "sudo -n sh -s"
        };
        let multiplex: Vec<String> = if fresh_session {
            vec!["-o".into(), "ControlPath=none".into()]
        } else {
            vec![
                "-o".into(),
                "ControlMaster=auto".into(),
                "-o".into(),
                format!("ControlPath={}", self.control_path.display()),
                "-o".into(),
                format!("ControlPersist={CONTROL_PERSIST_SECS}"),
            ]
        };
        let mut args: Vec<String> = vec![
            "-p".into(),
            context.port.to_string(),
            "-i".into(),
            expand_home(&context.credential.identity_file),
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            "ConnectTimeout=10".into(),
            "-o".into(),
            "StrictHostKeyChecking=accept-new".into(),
            "-o".into(),
            format!("UserKnownHostsFile={}", self.known_hosts.display()),
        ];
        args.extend(multiplex);
        args.extend([
            "-l".to_string(),
            context.credential.user.clone(),
            context.address.clone(),
            remote_shell.to_string(),
        ]);
        args
    }
}

impl<R: CommandRunner> RemoteExecutor for SshExecutor<R> {
    #[instrument(skip(self, batch), fields(target = %context, commands = batch.commands.len()))]
    async fn run(
        &self,
        context: &ConnectionContext,
        batch: &CommandBatch,
    ) -> Result<BatchOutcome, ExecError> {
        let args = self.args(context, batch.fresh_session);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let script = render_script(&batch.commands);

        let output = self
            .runner
            .run_with_stdin("ssh", &args, script.as_bytes(), batch.timeout)
            .await
            .map_err(|e| {
                if e.downcast_ref::<CommandTimeout>().is_some() {
                    ExecError::Timeout(batch.timeout)
                } else {
                    ExecError::Spawn(format!("{e:#}"))
                }
            })?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let (stderr, failed_at) = split_failure_marker(&String::from_utf8_lossy(&output.stderr));

        if exit_code == SSH_TRANSPORT_EXIT && failed_at.is_none() {
            return Err(ExecError::Unreachable {
                address: context.address.clone(),
                port: context.port,
                reason: stderr.trim().to_string(),
            });
        }
        debug!(exit_code, ?failed_at, "batch finished");
        Ok(BatchOutcome {
            exit_code,
            stdout,
            stderr,
            failed_at: if exit_code == 0 { None } else { failed_at.or(Some(0)) },
        })
    }
}

/// Shell script that runs `commands` in order and stops at the first failure.
#[must_use]
pub fn render_script(commands: &[String]) -> String {
    let mut script = String::from("set -u\n");
    for (i, cmd) in commands.iter().enumerate() {
        script.push_str("{\n");
        script.push_str(cmd);
        script.push_str(&format!(
            "\n}} || {{ rc=$?; printf '{FAILURE_MARKER}%d\\n' {i} >&2; exit \"$rc\"; }}\n"
        ));
    }
    script
}

/// Strip the failure marker from `stderr`, returning the failed index.
fn split_failure_marker(stderr: &str) -> (String, Option<usize>) {
    let mut failed_at = None;
    let mut rest = String::with_capacity(stderr.len());
    for line in stderr.lines() {
        match line.strip_prefix(FAILURE_MARKER) {
            Some(index) => failed_at = index.trim().parse().ok(),
            None => {
                rest.push_str(line);
                rest.push('\n');
            }
        }
    }
    (rest, failed_at)
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest).display().to_string(),
        _ => Path::new(path).display().to_string(),
    }
}
