//! Management-channel connection parameters and the remote batch contract.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How to authenticate over the management channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialRef {
    pub user: String,
    /// Private key path on the operator's machine.
    pub identity_file: String,
}

/// The currently-trusted path to a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionContext {
    pub address: String,
    pub port: u16,
    pub credential: CredentialRef,
    pub established_at: DateTime<Utc>,
}

impl ConnectionContext {
    #[must_use]
    pub fn new(address: impl Into<String>, port: u16, credential: CredentialRef) -> Self {
        Self {
            address: address.into(),
            port,
            credential,
            established_at: Utc::now(),
        }
    }

    /// Same host, different port and credential.
    #[must_use]
    pub fn migrated(&self, port: u16, credential: CredentialRef) -> Self {
        Self::new(self.address.clone(), port, credential)
    }
}

impl fmt::Display for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.credential.user, self.address, self.port)
    }
}

/// An all-or-nothing list of shell commands; execution stops at the first
/// non-zero exit.
///
/// Executors may carry batches to the same context over one shared
/// connection. A batch with `fresh_session` set must open its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBatch {
    pub commands: Vec<String>,
    pub timeout: Duration,
    pub fresh_session: bool,
}

impl CommandBatch {
    #[must_use]
    pub fn new(commands: Vec<String>, timeout: Duration) -> Self {
        Self {
            commands,
            timeout,
            fresh_session: false,
        }
    }

    /// A single command that always succeeds, sent over a new connection so
    /// it proves the listener still accepts one.
    #[must_use]
    pub fn noop(timeout: Duration) -> Self {
        Self {
            fresh_session: true,
            ..Self::new(vec!["true".to_string()], timeout)
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Result of a batch that reached the host.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Index of the command that failed, when `exit_code != 0`.
    pub failed_at: Option<usize>,
}

impl BatchOutcome {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
