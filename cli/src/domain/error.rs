//! Typed domain error enums.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or sockets.
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator.

use std::time::Duration;

use bulwark_common::{FailureKind, HardeningStage, LedgerEntry};
use thiserror::Error;

// ── Cloud provider errors ─────────────────────────────────────────────────────

/// Errors returned by the cloud compute port.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CloudError {
    /// The provider asked us to slow down. Safe to retry.
    #[error("cloud API throttled the request: {0}")]
    Throttled(String),

    /// The provider refused the request (quota, validation, permissions).
    #[error("cloud API rejected the request: {0}")]
    Rejected(String),

    #[error("cloud resource not found: {0}")]
    NotFound(String),

    /// The API could not be reached or returned unparseable output.
    #[error("cloud API unavailable: {0}")]
    Transport(String),
}

impl CloudError {
    /// Whether a bounded retry may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Throttled(_))
    }
}

// ── Remote execution errors ───────────────────────────────────────────────────

/// Transport-level failures of the remote executor.
///
/// A command that runs and exits non-zero is not an `ExecError`; it is
/// reported through the batch outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecError {
    #[error("host {address}:{port} unreachable: {reason}")]
    Unreachable {
        address: String,
        port: u16,
        reason: String,
    },

    #[error("remote batch timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("cannot start remote session: {0}")]
    Spawn(String),
}

impl ExecError {
    /// Connection drops are retried inside a stage; timeouts and spawn
    /// failures are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

// ── Profile errors ────────────────────────────────────────────────────────────

/// Reasons a security profile cannot be hardened against safely.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("profile '{0}' has no management port; hardening would lock the host")]
    MissingManagementPort(String),

    #[error("port 0 is not a valid {0} port")]
    ZeroPort(&'static str),

    #[error("rate-limit burst must be between 1 and 19, got {0}")]
    Burst(u8),

    #[error("rate-limit window must be at least one second")]
    ZeroWindow,

    #[error("invalid source scope '{0}': expected a CIDR such as 10.8.0.0/16")]
    InvalidScope(String),

    #[error("invalid admin user '{0}': must match ^[a-z_][a-z0-9_-]{{0,31}}$")]
    InvalidAdminUser(String),

    #[error(
        "target credential logs in as '{actual}' but the profile only admits '{expected}'"
    )]
    CredentialMismatch { expected: String, actual: String },
}

// ── Hardening errors ──────────────────────────────────────────────────────────

/// Errors that end a hardening run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HardenError {
    #[error(transparent)]
    Provider(#[from] CloudError),

    #[error("{what} did not finish within {}s", .after.as_secs())]
    Timeout { what: String, after: Duration },

    #[error("instance '{instance}' entered terminal state '{state}'")]
    TerminalState { instance: String, state: String },

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("management channel migration failed: {0}")]
    ChannelMigration(String),

    /// The channel was already switched to the target port when this failed.
    #[error("retiring the previous management channel failed: {0}")]
    ChannelRetire(String),

    /// An end-to-end check failed on a host that has already migrated.
    #[error("final verification failed: {0}")]
    FinalCheck(String),

    #[error("remote command {index} failed with exit code {exit_code}: {command}\n{stderr}")]
    CommandFailed {
        index: usize,
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error(transparent)]
    Unreachable(#[from] ExecError),

    #[error("unsafe profile: {0}")]
    UnsafeProfile(#[from] ProfileError),

    #[error("run cancelled before stage '{0}'")]
    Cancelled(HardeningStage),

    #[error("pipeline invariant violated: {0}")]
    InvariantViolation(String),
}

impl HardenError {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Provider(_) => FailureKind::Provider,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::TerminalState { .. } => FailureKind::TerminalState,
            Self::Verification(_) | Self::FinalCheck(_) => FailureKind::Verification,
            Self::ChannelMigration(_) | Self::ChannelRetire(_) => FailureKind::ChannelMigration,
            Self::CommandFailed { .. } => FailureKind::CommandFailed,
            Self::Unreachable(ExecError::Timeout(_)) => FailureKind::Timeout,
            Self::Unreachable(_) => FailureKind::Unreachable,
            Self::UnsafeProfile(_) => FailureKind::UnsafeProfile,
            Self::Cancelled(_) => FailureKind::Cancelled,
            Self::InvariantViolation(_) => FailureKind::Invariant,
        }
    }

    /// Operator-facing next step for a run that stopped with this error.
    #[must_use]
    pub fn remediation_hint(&self) -> String {
        match self {
            Self::Provider(e) if e.is_transient() => {
                "The cloud API is throttling requests. Retry the deployment in a few minutes."
                    .to_string()
            }
            Self::Provider(_) => {
                "Check cloud quotas and credentials ('bulwark config show'), then retry.".to_string()
            }
            Self::Timeout { .. } | Self::Unreachable(ExecError::Timeout(_)) => {
                "Raise the matching timeout with 'bulwark config set timeouts.<name>_secs <n>' and retry."
                    .to_string()
            }
            Self::TerminalState { instance, .. } => format!(
                "Instance '{instance}' cannot recover. Delete it in the cloud console and redeploy."
            ),
            Self::Verification(_) => "Confirm the cloud firewall exposes the management port \
                 (bulwark status <instance>) and retry; the host was not migrated."
                .to_string(),
            Self::ChannelMigration(_) => "The previous management channel is still active. \
                 Inspect /etc/ssh/sshd_config.d/10-bulwark.conf through it before retrying."
                .to_string(),
            Self::ChannelRetire(_) => "The channel had already switched to the target port and \
                 the previous one may be closed. Connect on the target port with the admin \
                 credential and inspect /etc/ssh/sshd_config.d/10-bulwark.conf."
                .to_string(),
            Self::FinalCheck(_) => "The management channel already moved to the target port. \
                 Connect through it with the admin credential ('bulwark status <instance>') and \
                 fix the reported check on the host."
                .to_string(),
            Self::CommandFailed { .. } => {
                "Inspect the failing command on the host, fix the cause and re-run; completed stages are idempotent."
                    .to_string()
            }
            Self::Unreachable(_) => {
                "Check that the host is running and the management port is reachable, then retry."
                    .to_string()
            }
            Self::UnsafeProfile(_) => {
                "Fix the security profile; nothing was changed on the host.".to_string()
            }
            Self::Cancelled(_) => "Run was cancelled at a stage boundary. Re-run to continue."
                .to_string(),
            Self::InvariantViolation(_) => {
                "This is a bug. Do not retry blindly; verify the host through the active channel."
                    .to_string()
            }
        }
    }
}

// ── Deployment errors ─────────────────────────────────────────────────────────

/// Plan-level validation failures, detected before any cloud or host call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("deployment plan '{0}' has no instances")]
    Empty(String),

    #[error("Invalid instance name '{0}': must match ^[a-z0-9]([a-z0-9-]{{0,61}}[a-z0-9])?$")]
    InvalidInstanceName(String),

    #[error("instance '{0}' appears more than once in the plan")]
    DuplicateInstance(String),

    #[error("static address '{0}' is bound to more than one instance")]
    DuplicateAddress(String),

    #[error("instance '{instance}': {source}")]
    Profile {
        instance: String,
        #[source]
        source: ProfileError,
    },

    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("instance '{0}' is not part of the plan")]
    UnknownInstance(String),
}

/// A single teardown step that failed during rollback.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[error("rollback of {entry} failed: {message}")]
pub struct RollbackError {
    pub entry: LedgerEntry,
    pub message: String,
}

// ── Config errors ─────────────────────────────────────────────────────────────

/// Errors related to configuration key/value validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown setting: {key}\n\nValid settings: {valid}")]
    UnknownKey { key: String, valid: String },

    #[error("Invalid value for {key}: {value}\n\nExpected: {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: String,
    },
}
