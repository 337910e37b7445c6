//! Application context: unified state passed to every command handler.
//!
//! `AppContext` carries the output mode and prompt policy. The concrete
//! adapter stack is built on demand by [`AppContext::stack`], so commands
//! that never touch a host (`compile`, `config`, `version`) never need one.

use std::time::Duration;

use anyhow::Result;

use crate::application::services::config_service;
use crate::application::services::hardening::HardeningOptions;
use crate::application::services::lifecycle::InstanceLifecycleTracker;
use crate::application::services::orchestrator::DeployOptions;
use crate::application::services::retry::RetryPolicy;
use crate::domain::config::BulwarkConfig;
use crate::infra::command_runner::{DEFAULT_CMD_TIMEOUT, TokioCommandRunner};
use crate::infra::config::YamlConfigStore;
use crate::infra::lightsail::LightsailCloud;
use crate::infra::network::TcpProbe;
use crate::infra::ssh::SshExecutor;
use crate::infra::state::JsonRunStore;
use crate::output::{HumanRenderer, JsonRenderer, OutputContext, Renderer, TerminalReporter};

/// Output rendering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-readable terminal output (default).
    Human,
    /// Machine-readable JSON output.
    Json,
}

/// Output rendering flags.
pub struct OutputFlags {
    pub no_color: bool,
    pub quiet: bool,
    pub json: bool,
}

/// Behaviour flags.
pub struct BehaviourFlags {
    /// Skip interactive prompts (also set by `CI` / `BULWARK_YES` env vars).
    pub yes: bool,
}

/// Flags passed from the top-level CLI to `AppContext::new`.
pub struct AppFlags {
    pub output: OutputFlags,
    pub behaviour: BehaviourFlags,
}

/// Production adapters behind the application ports.
pub struct Stack {
    pub tracker: InstanceLifecycleTracker<LightsailCloud<TokioCommandRunner>>,
    pub executor: SshExecutor<TokioCommandRunner>,
    pub probe: TcpProbe,
    pub store: JsonRunStore,
}

/// Unified application context passed to every command handler.
pub struct AppContext {
    pub output: OutputContext,
    pub mode: OutputMode,
    pub config_store: YamlConfigStore,
    /// When `true`, skip interactive prompts and use defaults.
    ///
    /// Set when `--yes` / `-y` is passed, or when the `CI` or `BULWARK_YES`
    /// environment variables are present.
    pub non_interactive: bool,
}

impl AppContext {
    #[must_use]
    pub fn new(flags: &AppFlags) -> Self {
        let ci_env = std::env::var("CI").is_ok() || std::env::var("BULWARK_YES").is_ok();
        let mode = if flags.output.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        };
        Self {
            output: OutputContext::new(flags.output.no_color, flags.output.quiet),
            mode,
            config_store: YamlConfigStore,
            non_interactive: flags.behaviour.yes || ci_env,
        }
    }

    #[must_use]
    pub fn is_json(&self) -> bool {
        self.mode == OutputMode::Json
    }

    /// Returns the appropriate `Renderer` variant for the current output mode.
    #[must_use]
    pub fn renderer(&self) -> Renderer<'_> {
        match self.mode {
            OutputMode::Human => Renderer::Human(HumanRenderer::new(&self.output)),
            OutputMode::Json => Renderer::Json(JsonRenderer),
        }
    }

    /// Progress reporter; writes to stderr in JSON mode.
    #[must_use]
    pub fn reporter(&self) -> TerminalReporter<'_> {
        if self.is_json() {
            TerminalReporter::stderr(&self.output)
        } else {
            TerminalReporter::new(&self.output)
        }
    }

    /// # Errors
    ///
    /// Returns an error if the configuration file exists but is unreadable.
    pub fn config(&self) -> Result<BulwarkConfig> {
        config_service::load_config(&self.config_store)
    }

    /// Build the production adapter stack for `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn stack(&self, config: &BulwarkConfig) -> Result<Stack> {
        let retry = RetryPolicy::from(config.retry);
        let cloud = LightsailCloud::new(TokioCommandRunner::new(DEFAULT_CMD_TIMEOUT), &config.cloud);
        Ok(Stack {
            tracker: InstanceLifecycleTracker::new(cloud, retry),
            executor: SshExecutor::new(TokioCommandRunner::new(config.timeouts.command()))?,
            probe: TcpProbe,
            store: JsonRunStore::new()?,
        })
    }

    /// Ask the user for confirmation.
    ///
    /// When `non_interactive` is `true` (CI, `--yes` flag, or `BULWARK_YES`
    /// env), returns `default` immediately without prompting.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal prompt fails (e.g. no TTY available).
    pub fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        if self.non_interactive {
            return Ok(default);
        }
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()?;
        Ok(confirmed)
    }
}

/// Orchestrator and pipeline budgets derived from `config`.
#[must_use]
pub fn deploy_options(config: &BulwarkConfig) -> DeployOptions {
    DeployOptions {
        concurrency: config.concurrency.max(1),
        ready_timeout: config.timeouts.ready(),
        hardening: HardeningOptions {
            command_timeout: config.timeouts.command(),
            gate_timeout: config.timeouts.gate(),
            gate_poll_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
            retry: RetryPolicy::from(config.retry),
        },
    }
}
