//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain`, never from `crate::infra`,
//! `crate::commands`, or `crate::output`.

use std::process::Output;
use std::time::Duration;

use anyhow::Result;

use crate::domain::config::BulwarkConfig;
use crate::domain::instance::{AddressDescription, InstanceDescription, InstanceSpec, PortRule};
use crate::domain::{BatchOutcome, CloudError, CommandBatch, ConnectionContext, ExecError, PipelineRun};

// ── Cloud Port ────────────────────────────────────────────────────────────────

/// Cloud compute provider. Calls are idempotent on the provider side but
/// eventually consistent: a successful write may not be visible to the next
/// read.
#[allow(async_fn_in_trait)]
pub trait CloudCompute {
    /// Request a new instance. Returns once the provider accepted it.
    async fn create_instance(&self, spec: &InstanceSpec) -> Result<(), CloudError>;
    async fn describe_instance(&self, name: &str) -> Result<InstanceDescription, CloudError>;
    async fn terminate_instance(&self, name: &str) -> Result<(), CloudError>;

    /// Add an entry to the instance's network ACL.
    async fn open_port(&self, instance: &str, rule: &PortRule) -> Result<(), CloudError>;
    /// Remove an entry from the instance's network ACL.
    async fn close_port(&self, instance: &str, rule: &PortRule) -> Result<(), CloudError>;
    /// Entries currently open in the instance's network ACL.
    async fn list_ports(&self, instance: &str) -> Result<Vec<PortRule>, CloudError>;

    async fn allocate_address(&self, name: &str) -> Result<(), CloudError>;
    async fn attach_address(&self, name: &str, instance: &str) -> Result<(), CloudError>;
    async fn detach_address(&self, name: &str) -> Result<(), CloudError>;
    async fn release_address(&self, name: &str) -> Result<(), CloudError>;
    async fn describe_address(&self, name: &str) -> Result<AddressDescription, CloudError>;
}

// ── Remote Execution Port ─────────────────────────────────────────────────────

/// Executes command batches on a host over a management channel.
///
/// A batch that reaches the host returns `Ok` whatever its exit code;
/// `Err` means the channel itself failed.
#[allow(async_fn_in_trait)]
pub trait RemoteExecutor {
    async fn run(
        &self,
        context: &ConnectionContext,
        batch: &CommandBatch,
    ) -> Result<BatchOutcome, ExecError>;
}

// ── Reachability Port ─────────────────────────────────────────────────────────

/// Outcome of a TCP connect attempt from the operator's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// Something accepted the connection.
    Open,
    /// The host answered with a reset: the path is open, nothing listens.
    Refused,
    /// No answer: something on the path drops the packets.
    Filtered,
}

#[allow(async_fn_in_trait)]
pub trait ReachabilityProbe {
    async fn probe(&self, address: &str, port: u16, timeout: Duration) -> ProbeResult;
}

// ── Command Runner Port ───────────────────────────────────────────────────────

/// Abstracts process execution so infrastructure can be swapped or mocked.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run a program and capture its output.
    ///
    /// Implementations should delegate to `run_with_timeout` using the
    /// instance's configured default timeout.
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output>;
    /// Run a program with a custom timeout override.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or exceeds `timeout`.
    /// On timeout, the child process must be killed (not left orphaned).
    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Output>;
    /// Run a program with stdin piped from `stdin`, bounded by `timeout`.
    async fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        stdin: &[u8],
        timeout: Duration,
    ) -> Result<Output>;
}

// ── Progress Reporting Port ───────────────────────────────────────────────────

/// Abstracts progress reporting so services can emit events without
/// depending on the Presentation layer. Sync trait: no async needed.
pub trait ProgressReporter {
    /// Emit an in-progress step message.
    fn step(&self, message: &str);
    /// Emit a success message.
    fn success(&self, message: &str);
    /// Emit a warning message.
    fn warn(&self, message: &str);
}

// ── State and Config Ports ────────────────────────────────────────────────────

/// Persists the latest hardening run per instance.
#[allow(async_fn_in_trait)]
pub trait PipelineRunStore {
    /// Load the latest run for `instance`, or `None` if it was never hardened.
    async fn load_async(&self, instance: &str) -> Result<Option<PipelineRun>>;
    /// Persist `run`, replacing the previous record for its instance.
    async fn save_async(&self, run: &PipelineRun) -> Result<()>;
}

/// Abstracts loading and saving the user configuration file.
pub trait ConfigStore {
    /// Load configuration, returning defaults when no file exists.
    fn load(&self) -> Result<BulwarkConfig>;
    /// Persist configuration.
    fn save(&self, config: &BulwarkConfig) -> Result<()>;
    /// Location of the configuration file.
    fn path(&self) -> Result<std::path::PathBuf>;
}
