//! Application service: the hardening pipeline.
//!
//! Drives one host through
//! `Created → BaselineApplied → FilterInstalled → PortVerifiedOpen →
//! ChannelMigrated → IntrusionGuardActive → Complete`, stopping at the first
//! failure. Stages run strictly in sequence; the only retries are bounded
//! ones inside a stage.
//!
//! Channel migration is the one step that cannot be undone from outside the
//! host. It takes a [`PortVerified`] value, which only the port-exposure gate
//! can produce, and the run record independently refuses to enter
//! `ChannelMigrated` without a passed gate record.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bulwark_common::{HardeningStage, LedgerEntry, Phase, ResourceType};
use chrono::Utc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::application::ports::{
    CloudCompute, PipelineRunStore, ProbeResult, ProgressReporter, ReachabilityProbe,
    RemoteExecutor,
};
use crate::application::services::lifecycle::InstanceLifecycleTracker;
use crate::application::services::retry::{RetryPolicy, with_retry};
use crate::domain::firewall::{self, FilterRule, IpFamily};
use crate::domain::marker::{self, CompletionMarker};
use crate::domain::pipeline::gate_check;
use crate::domain::profile::Protocol;
use crate::domain::shell::read_file_command;
use crate::domain::sshd::{self, DaemonConfig};
use crate::domain::{baseline, guard};
use crate::domain::{
    BatchOutcome, CommandBatch, ConnectionContext, CredentialRef, HardenError, PipelineRun,
    SecurityProfile,
};
use crate::domain::instance::Instance;

// ── Options and requests ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct HardeningOptions {
    /// Budget for each remote batch.
    pub command_timeout: Duration,
    /// Budget for the cloud ACL to expose the target port.
    pub gate_timeout: Duration,
    pub gate_poll_interval: Duration,
    pub probe_timeout: Duration,
    /// Retry for dropped connections inside a stage.
    pub retry: RetryPolicy,
}

impl Default for HardeningOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(300),
            gate_timeout: Duration::from_secs(120),
            gate_poll_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

/// Everything one run needs to know about its host.
pub struct HardeningRequest<'a> {
    pub instance: &'a Instance,
    pub profile: &'a SecurityProfile,
    /// The channel that works right now.
    pub bootstrap: ConnectionContext,
    /// Credential for the migrated channel.
    pub target: CredentialRef,
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot cancel: stage '{0}' has started and must finish")]
pub struct CancelRefused(pub HardeningStage);

#[derive(Debug, Default)]
struct CancelState {
    requested: bool,
    /// Set when the first run sharing the token starts migrating; never cleared.
    migrating: Option<HardeningStage>,
}

/// Cooperative cancellation, honored only between stages.
///
/// One token may be shared by every run in a deployment. Once any of them
/// has started the channel migration, requests are refused for all of them,
/// and a run that has migrated always goes on to `Complete` or `Failed`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<Mutex<CancelState>>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop at the next stage boundary.
    ///
    /// # Errors
    ///
    /// Returns [`CancelRefused`] once any run has started migrating.
    pub fn cancel(&self) -> Result<(), CancelRefused> {
        let mut state = self.lock();
        if let Some(stage) = state.migrating {
            return Err(CancelRefused(stage));
        }
        state.requested = true;
        Ok(())
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.lock().requested
    }

    /// Called at each boundary. Returns `true` if the run must stop
    /// instead of starting `stage`.
    fn begin(&self, stage: HardeningStage) -> bool {
        let mut state = self.lock();
        if stage > HardeningStage::ChannelMigrated {
            return false;
        }
        if state.requested {
            return true;
        }
        if stage.is_past_migration() {
            state.migrating.get_or_insert(stage);
        }
        false
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CancelState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// ── Gate proof ───────────────────────────────────────────────────────────────

/// Evidence that the target port is exposed by the cloud ACL and not dropped
/// on the way to the host. Only the gate constructs it.
#[derive(Debug)]
pub struct PortVerified {
    port: u16,
}

impl PortVerified {
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

pub struct HardeningPipeline<'a, C, E, P, S, R> {
    tracker: &'a InstanceLifecycleTracker<C>,
    executor: &'a E,
    probe: &'a P,
    store: &'a S,
    reporter: &'a R,
    options: HardeningOptions,
}

impl<'a, C, E, P, S, R> HardeningPipeline<'a, C, E, P, S, R>
where
    C: CloudCompute,
    E: RemoteExecutor,
    P: ReachabilityProbe,
    S: PipelineRunStore,
    R: ProgressReporter,
{
    pub fn new(
        tracker: &'a InstanceLifecycleTracker<C>,
        executor: &'a E,
        probe: &'a P,
        store: &'a S,
        reporter: &'a R,
        options: HardeningOptions,
    ) -> Self {
        Self {
            tracker,
            executor,
            probe,
            store,
            reporter,
            options,
        }
    }

    /// Run the pipeline to a terminal state and return the run record.
    ///
    /// Never returns an error: every failure is captured in the record
    /// together with the last completed stage and a remediation hint.
    #[instrument(skip_all, fields(instance = %req.instance.id, profile = %req.profile.name))]
    pub async fn run(&self, req: &HardeningRequest<'_>, cancel: &CancelToken) -> PipelineRun {
        let mut run = PipelineRun::new(&req.instance.id, &req.profile.name, req.bootstrap.clone());

        let started = req
            .profile
            .validate_for_pipeline(&req.target.user)
            .map_err(HardenError::from)
            .and_then(|port| run.start(port));
        if let Err(e) = started {
            return self.finish_failed(run, &e).await;
        }
        self.persist(&run).await;

        let rules = firewall::compile(req.profile);
        let mut proof: Option<PortVerified> = None;

        while let Some(stage) = run.next_stage() {
            if cancel.begin(stage) {
                return self.finish_failed(run, &HardenError::Cancelled(stage)).await;
            }
            self.reporter
                .step(&format!("{}: {}", req.instance.id, stage.description()));
            debug!(stage = %stage, "starting stage");

            let outcome = match stage {
                HardeningStage::Created => Err(HardenError::InvariantViolation(
                    "a run never re-enters Created".to_string(),
                )),
                HardeningStage::BaselineApplied => self.apply_baseline(&run.active_context).await,
                HardeningStage::FilterInstalled => self.install_filter(&mut run, &rules).await,
                HardeningStage::PortVerifiedOpen => {
                    self.verify_gate(&mut run, req.instance).await.map(|p| {
                        proof = Some(p);
                    })
                }
                HardeningStage::ChannelMigrated => match proof.take() {
                    Some(p) => self.migrate_channel(&mut run, req, &rules, p).await,
                    None => Err(HardenError::InvariantViolation(
                        "channel migration attempted without a gate proof".to_string(),
                    )),
                },
                HardeningStage::IntrusionGuardActive => self.activate_guard(&mut run, req.profile).await,
                HardeningStage::Complete => self.final_verification(&mut run, req.profile, &rules).await,
            };

            if let Err(e) = outcome.and_then(|()| run.advance(stage)) {
                return self.finish_failed(run, &e).await;
            }
            info!(stage = %stage, "stage complete");
            self.reporter.success(&format!("{}: {stage}", req.instance.id));
            self.persist(&run).await;
        }
        run
    }

    async fn finish_failed(&self, mut run: PipelineRun, error: &HardenError) -> PipelineRun {
        warn!(stage = %run.stage, kind = ?error.kind(), error = %error, "hardening stopped");
        run.fail(error);
        self.reporter
            .warn(&format!("{}: {error}", run.instance));
        self.persist(&run).await;
        run
    }

    async fn persist(&self, run: &PipelineRun) {
        if let Err(e) = self.store.save_async(run).await {
            warn!(error = %e, "could not persist pipeline run");
            self.reporter
                .warn(&format!("{}: run record not saved: {e}", run.instance));
        }
    }

    // ── Remote helpers ───────────────────────────────────────────────────────

    async fn submit(&self, ctx: &ConnectionContext, batch: &CommandBatch) -> Result<BatchOutcome, HardenError> {
        let outcome = self.executor.run(ctx, batch).await?;
        if outcome.success() {
            return Ok(outcome);
        }
        let index = outcome.failed_at.unwrap_or(0);
        Err(HardenError::CommandFailed {
            index,
            command: batch.commands.get(index).cloned().unwrap_or_default(),
            exit_code: outcome.exit_code,
            stderr: outcome.stderr.trim().to_string(),
        })
    }

    /// `submit`, retrying dropped connections. Batches must be idempotent.
    async fn submit_retrying(
        &self,
        ctx: &ConnectionContext,
        batch: &CommandBatch,
    ) -> Result<BatchOutcome, HardenError> {
        with_retry(
            self.options.retry,
            "remote batch",
            |e: &HardenError| matches!(e, HardenError::Unreachable(x) if x.is_transient()),
            move || self.submit(ctx, batch),
        )
        .await
    }

    async fn exec_retrying(
        &self,
        ctx: &ConnectionContext,
        commands: Vec<String>,
    ) -> Result<BatchOutcome, HardenError> {
        let batch = CommandBatch::new(commands, self.options.command_timeout);
        self.submit_retrying(ctx, &batch).await
    }

    /// No-op over a new connection: proves the listener accepts one.
    async fn round_trip(&self, ctx: &ConnectionContext) -> Result<(), HardenError> {
        let batch = CommandBatch::noop(self.options.command_timeout);
        self.submit_retrying(ctx, &batch).await.map(|_| ())
    }

    // ── Stages ───────────────────────────────────────────────────────────────

    async fn apply_baseline(&self, ctx: &ConnectionContext) -> Result<(), HardenError> {
        let live = self.exec_retrying(ctx, vec![baseline::read_live_command()]).await?;
        let persisted = self
            .exec_retrying(ctx, vec![baseline::read_persisted_command()])
            .await?;
        let plan = baseline::plan(&baseline::parse_sysctl_output(&live.stdout), &persisted.stdout);
        if plan.is_empty() {
            debug!("baseline already in place");
            return Ok(());
        }
        info!(changes = plan.changes.len(), write_file = plan.write_file, "applying baseline");
        self.exec_retrying(ctx, plan.commands()).await?;
        Ok(())
    }

    async fn install_filter(&self, run: &mut PipelineRun, rules: &[FilterRule]) -> Result<(), HardenError> {
        let ctx = run.active_context.clone();
        let transitional = firewall::with_transitional_port(rules, ctx.port);
        self.exec_retrying(&ctx, firewall::install_commands(&transitional))
            .await?;
        run.record_effect(LedgerEntry::new(
            ResourceType::HostFilter,
            firewall::RULES_DIR,
            Phase::Hardening,
            &run.instance,
        ));

        let check = self.round_trip(&ctx).await;
        run.record_verification(
            HardeningStage::FilterInstalled,
            "current_channel_after_filter",
            check.is_ok(),
            format!("no-op via {ctx}"),
        );
        check
    }

    /// Read-only gate: poll the cloud ACL and probe the port until both
    /// layers let the target port through, or the gate budget runs out.
    async fn verify_gate(
        &self,
        run: &mut PipelineRun,
        instance: &Instance,
    ) -> Result<PortVerified, HardenError> {
        let Some(port) = run.target_port else {
            return Err(HardenError::InvariantViolation("run has no target port".to_string()));
        };
        let address = run.active_context.address.clone();
        let deadline = Instant::now() + self.options.gate_timeout;

        let detail = loop {
            let exposed = self
                .tracker
                .exposes_port(&instance.id, port, Protocol::Tcp)
                .await?;
            let detail = if exposed {
                match self.probe.probe(&address, port, self.options.probe_timeout).await {
                    ProbeResult::Filtered => {
                        format!("cloud ACL exposes {port}/tcp but a TCP probe to {address} was dropped")
                    }
                    result => {
                        let detail = format!("cloud ACL exposes {port}/tcp; probe {result:?}");
                        run.record_verification(HardeningStage::PortVerifiedOpen, gate_check(port), true, &detail);
                        info!(port, "management port verified open");
                        return Ok(PortVerified { port });
                    }
                }
            } else {
                format!("cloud ACL does not expose {port}/tcp")
            };

            let now = Instant::now();
            if now >= deadline {
                break detail;
            }
            debug!(port, %detail, "gate not satisfied yet");
            tokio::time::sleep(self.options.gate_poll_interval.min(deadline - now)).await;
        };

        let detail = format!("{detail} after {}s", self.options.gate_timeout.as_secs());
        run.record_verification(HardeningStage::PortVerifiedOpen, gate_check(port), false, &detail);
        Err(HardenError::Verification(detail))
    }

    /// Move the management channel to the target port and credential.
    ///
    /// The old context stays active until a no-op has round-tripped through
    /// the new one; only then is the old listener retired.
    async fn migrate_channel(
        &self,
        run: &mut PipelineRun,
        req: &HardeningRequest<'_>,
        rules: &[FilterRule],
        proof: PortVerified,
    ) -> Result<(), HardenError> {
        let old = run.active_context.clone();
        let target_port = proof.port();
        let admin = req.target.user.as_str();

        let mut commands = sshd::ensure_admin_commands(admin, &old.credential.user);
        commands.extend(
            DaemonConfig::transitional(old.port, &old.credential.user, target_port, admin)
                .apply_commands(),
        );
        if let Err(e) = self.exec_retrying(&old, commands).await {
            return Err(self
                .migration_failed(run, &old, format!("configuring the daemon for both ports: {e}"))
                .await);
        }

        let new = old.migrated(target_port, req.target.clone());
        let verified = self.round_trip(&new).await;
        run.record_verification(
            HardeningStage::ChannelMigrated,
            "new_channel_round_trip",
            verified.is_ok(),
            match &verified {
                Ok(()) => format!("no-op via {new}"),
                Err(e) => e.to_string(),
            },
        );
        if let Err(e) = verified {
            return Err(self
                .migration_failed(run, &old, format!("new channel {new} did not answer: {e}"))
                .await);
        }

        info!(from = %old, to = %new, "management channel verified, switching");
        run.active_context = new.clone();

        self.exec_retrying(&new, DaemonConfig::target(target_port, admin).apply_commands())
            .await
            .map_err(|e| HardenError::ChannelRetire(format!("retiring the old listener: {e}")))?;
        let still_there = self.round_trip(&new).await;
        run.record_verification(
            HardeningStage::ChannelMigrated,
            "channel_after_retire",
            still_there.is_ok(),
            format!("no-op via {new}"),
        );
        still_there.map_err(|e| {
            HardenError::ChannelRetire(format!("channel lost after retiring the old listener: {e}"))
        })?;

        self.exec_retrying(&new, firewall::reload_commands(rules)).await?;
        let after_tighten = self.round_trip(&new).await;
        run.record_verification(
            HardeningStage::ChannelMigrated,
            "channel_after_filter_tighten",
            after_tighten.is_ok(),
            format!("transitional accept for port {} removed", old.port),
        );
        after_tighten.map_err(|e| {
            HardenError::ChannelRetire(format!("channel lost after tightening the filter: {e}"))
        })
    }

    /// Re-verify the old channel after a failed migration and build the error.
    async fn migration_failed(
        &self,
        run: &mut PipelineRun,
        old: &ConnectionContext,
        reason: String,
    ) -> HardenError {
        let survived = self.round_trip(old).await;
        run.record_verification(
            HardeningStage::ChannelMigrated,
            "previous_channel_survives",
            survived.is_ok(),
            format!("no-op via {old}"),
        );
        match survived {
            Ok(()) => HardenError::ChannelMigration(reason),
            Err(e) => HardenError::ChannelMigration(format!(
                "{reason}; previous channel {old} is unreachable too: {e}"
            )),
        }
    }

    async fn activate_guard(
        &self,
        run: &mut PipelineRun,
        profile: &SecurityProfile,
    ) -> Result<(), HardenError> {
        let ctx = run.active_context.clone();
        self.exec_retrying(&ctx, guard::install_commands(profile))
            .await?;
        run.record_effect(LedgerEntry::new(
            ResourceType::IntrusionGuard,
            guard::JAIL_PATH,
            Phase::Hardening,
            &run.instance,
        ));
        Ok(())
    }

    /// Idempotent end-to-end check, then the completion marker.
    async fn final_verification(
        &self,
        run: &mut PipelineRun,
        profile: &SecurityProfile,
        rules: &[FilterRule],
    ) -> Result<(), HardenError> {
        let ctx = run.active_context.clone();
        let Some(port) = run.target_port else {
            return Err(HardenError::InvariantViolation("run has no target port".to_string()));
        };

        let effective = self
            .exec_retrying(&ctx, vec![sshd::QUERY_COMMAND.to_string()])
            .await?;
        let ports = sshd::parse_effective_ports(&effective.stdout);
        let daemon_ok = ports == [port];
        run.record_verification(
            HardeningStage::Complete,
            "daemon_ports",
            daemon_ok,
            format!("listening on {ports:?}"),
        );
        if !daemon_ok {
            return Err(HardenError::FinalCheck(format!(
                "daemon listens on {ports:?}, expected only {port}"
            )));
        }

        for (path, family) in [
            (firewall::RULES_V4_PATH, IpFamily::V4),
            (firewall::RULES_V6_PATH, IpFamily::V6),
        ] {
            let persisted = self.exec_retrying(&ctx, vec![read_file_command(path)]).await?;
            let ok = persisted.stdout == firewall::render(rules, family);
            run.record_verification(HardeningStage::Complete, "persisted_filter", ok, path);
            if !ok {
                return Err(HardenError::FinalCheck(format!(
                    "{path} does not match the compiled profile"
                )));
            }
        }

        let batch = CommandBatch::new(vec![guard::ACTIVE_COMMAND.to_string()], self.options.command_timeout);
        let active = self.executor.run(&ctx, &batch).await?;
        let guard_ok = active.stdout.trim() == "active";
        run.record_verification(
            HardeningStage::Complete,
            "intrusion_guard_active",
            guard_ok,
            active.stdout.trim(),
        );
        if !guard_ok {
            return Err(HardenError::FinalCheck(
                "intrusion guard is not active".to_string(),
            ));
        }

        let marker = CompletionMarker {
            profile: profile.name.clone(),
            rule_fingerprint: firewall::fingerprint(rules),
            management_port: port,
            completed_at: Utc::now(),
            bulwark_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let commands = marker.write_commands().map_err(|e| {
            HardenError::InvariantViolation(format!("cannot encode completion marker: {e}"))
        })?;
        self.exec_retrying(&ctx, commands).await?;
        run.record_effect(LedgerEntry::new(
            ResourceType::CompletionMarker,
            marker::MARKER_PATH,
            Phase::Hardening,
            &run.instance,
        ));
        Ok(())
    }
}
