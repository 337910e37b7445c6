//! Application service: multi-host deployment.
//!
//! Runs Infrastructure → Hardening → Services strictly in order. Within a
//! phase, hosts run on a bounded worker pool and each host appends its own
//! ledger segment; segments only merge when the ledger is read. On the first
//! failed phase the rest are skipped and the merged ledger is undone in
//! reverse.

use std::collections::HashMap;
use std::time::Duration;

use bulwark_common::{LedgerEntry, Phase, ResourceType};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::application::ports::{
    CloudCompute, PipelineRunStore, ProgressReporter, ReachabilityProbe, RemoteExecutor,
};
use crate::application::services::hardening::{
    CancelToken, HardeningOptions, HardeningPipeline, HardeningRequest,
};
use crate::application::services::lifecycle::InstanceLifecycleTracker;
use crate::application::services::retry::with_retry;
use crate::domain::instance::{Instance, PortRule};
use crate::domain::ledger::ResourceLedger;
use crate::domain::plan::{InstancePlan, ServiceSpec};
use crate::domain::profile::Protocol;
use crate::domain::{firewall, guard, marker};
use crate::domain::{
    CommandBatch, ConnectionContext, DeploymentPlan, ExecError, HardenError, PipelineRun,
    PlanError, RollbackError, SecurityProfile,
};

// ── Results ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Succeeded,
    Failed,
    Skipped,
    /// Dry run: validated, nothing executed.
    Planned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceFailure {
    pub instance: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseResult {
    pub phase: Phase,
    pub status: PhaseStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<InstanceFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RollbackReport {
    /// Entries torn down, in the order they were undone.
    pub undone: Vec<LedgerEntry>,
    pub errors: Vec<RollbackError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentResult {
    pub plan: String,
    pub dry_run: bool,
    /// Effects in the order they took place (predicted, for a dry run).
    pub ledger: Vec<LedgerEntry>,
    pub phase_results: Vec<PhaseResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub runs: Vec<PipelineRun>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackReport>,
}

impl DeploymentResult {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.rollback.is_none()
            && self
                .phase_results
                .iter()
                .all(|p| matches!(p.status, PhaseStatus::Succeeded | PhaseStatus::Planned))
    }
}

// ── Planned effects ──────────────────────────────────────────────────────────

/// ACL entries an instance needs: the management port and public rules open
/// to everyone, restricted rules open to their scope only.
#[must_use]
pub fn acl_rules(profile: &SecurityProfile) -> Vec<PortRule> {
    let mut rules = Vec::new();
    if let Some(port) = profile.management_port {
        rules.push(PortRule::public(port, Protocol::Tcp));
    }
    rules.extend(
        profile
            .public_rules
            .iter()
            .map(|r| PortRule::public(r.port, r.protocol)),
    );
    rules.extend(
        profile
            .restricted_rules
            .iter()
            .map(|r| PortRule::single(r.port, r.protocol, vec![r.source_scope.clone()])),
    );
    rules
}

fn planned_infrastructure(plan: &InstancePlan, profile: &SecurityProfile) -> Vec<LedgerEntry> {
    let name = plan.name();
    let mut entries = vec![LedgerEntry::new(ResourceType::Instance, name, Phase::Infrastructure, name)];
    if let Some(address) = &plan.static_address {
        entries.push(LedgerEntry::new(ResourceType::StaticAddress, address, Phase::Infrastructure, name));
    }
    entries.extend(
        acl_rules(profile)
            .iter()
            .map(|r| LedgerEntry::new(ResourceType::AclPort, r.resource_id(), Phase::Infrastructure, name)),
    );
    entries
}

fn planned_hardening(plan: &InstancePlan) -> Vec<LedgerEntry> {
    let name = plan.name();
    vec![
        LedgerEntry::new(ResourceType::HostFilter, firewall::RULES_DIR, Phase::Hardening, name),
        LedgerEntry::new(ResourceType::IntrusionGuard, guard::JAIL_PATH, Phase::Hardening, name),
        LedgerEntry::new(ResourceType::CompletionMarker, marker::MARKER_PATH, Phase::Hardening, name),
    ]
}

fn service_entry(plan: &InstancePlan, service: &ServiceSpec) -> LedgerEntry {
    LedgerEntry::new(ResourceType::Service, &service.name, Phase::Services, plan.name())
}

// ── Orchestrator ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct DeployOptions {
    /// Hosts worked on at once within a phase.
    pub concurrency: usize,
    pub ready_timeout: Duration,
    pub hardening: HardeningOptions,
}

/// What one host produced in one phase.
struct HostOutcome<T> {
    slot: usize,
    instance: String,
    entries: Vec<LedgerEntry>,
    result: Result<T, String>,
}

impl<T> HostOutcome<T> {
    fn failed(slot: usize, instance: &str, message: String) -> Self {
        Self {
            slot,
            instance: instance.to_string(),
            entries: Vec::new(),
            result: Err(message),
        }
    }
}

/// Run `work` on at most `concurrency` hosts at once; outcomes come back in
/// completion order.
async fn run_phase<I, T, F, Fut, O>(concurrency: usize, work: I, f: F) -> Vec<HostOutcome<O>>
where
    I: Iterator<Item = (usize, T)>,
    F: Fn(usize, T) -> Fut,
    Fut: std::future::Future<Output = HostOutcome<O>>,
{
    stream::iter(work)
        .map(|(slot, item)| f(slot, item))
        .buffer_unordered(concurrency)
        .collect()
        .await
}

pub struct DeploymentOrchestrator<'a, C, E, P, S, R> {
    tracker: &'a InstanceLifecycleTracker<C>,
    executor: &'a E,
    probe: &'a P,
    store: &'a S,
    reporter: &'a R,
    options: DeployOptions,
}

impl<'a, C, E, P, S, R> DeploymentOrchestrator<'a, C, E, P, S, R>
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
        options: DeployOptions,
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

    fn pipeline(&self) -> HardeningPipeline<'a, C, E, P, S, R> {
        HardeningPipeline::new(
            self.tracker,
            self.executor,
            self.probe,
            self.store,
            self.reporter,
            self.options.hardening,
        )
    }

    /// Deploy `plan`, or only plan it when `dry_run` is set.
    ///
    /// Phase failures do not produce `Err`: they are reported in the result
    /// together with the rollback that followed.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError`] if the plan is invalid; nothing has been
    /// contacted in that case.
    #[instrument(skip_all, fields(plan = %plan.name, dry_run))]
    pub async fn deploy(
        &self,
        plan: &DeploymentPlan,
        dry_run: bool,
        cancel: &CancelToken,
    ) -> Result<DeploymentResult, PlanError> {
        let profiles = plan.resolve()?;
        if dry_run {
            return Ok(Self::dry_run(plan, &profiles));
        }
        let concurrency = plan.concurrency.unwrap_or(self.options.concurrency).max(1);
        info!(instances = plan.instances.len(), concurrency, "deployment started");

        let mut ledger = ResourceLedger::new();
        let mut phase_results = Vec::new();
        let mut runs: Vec<PipelineRun> = Vec::new();

        // Phase 1: infrastructure.
        let work = plan.instances.iter().zip(&profiles).enumerate();
        let infra = run_phase(concurrency, work, |slot, (ip, profile)| {
            self.provision_one(slot, ip, profile)
        })
        .await;
        let (instances, failures) = Self::absorb(&mut ledger, Phase::Infrastructure, infra);
        let mut failed = !failures.is_empty();
        phase_results.push(PhaseResult::finished(Phase::Infrastructure, failures));

        // Phase 2: hardening.
        if failed {
            phase_results.push(PhaseResult::skipped(Phase::Hardening));
        } else {
            let work = plan
                .instances
                .iter()
                .zip(&profiles)
                .zip(&instances)
                .enumerate()
                .map(|(slot, ((ip, profile), instance))| (slot, (ip, profile, instance)));
            let hardened = run_phase(concurrency, work, |slot, (ip, profile, instance)| {
                self.harden_one(slot, ip, profile, instance.as_ref(), cancel)
            })
            .await;
            let (finished, mut failures) = Self::absorb(&mut ledger, Phase::Hardening, hardened);
            for run in finished.into_iter().flatten() {
                if let Some(failure) = &run.failure {
                    failures.push(InstanceFailure {
                        instance: run.instance.clone(),
                        message: format!("{} ({})", failure.message, failure.hint),
                    });
                }
                runs.push(run);
            }
            failures.sort_by(|a, b| a.instance.cmp(&b.instance));
            failed = !failures.is_empty();
            phase_results.push(PhaseResult::finished(Phase::Hardening, failures));
        }
        runs.sort_by(|a, b| a.instance.cmp(&b.instance));
        let contexts: HashMap<String, ConnectionContext> = runs
            .iter()
            .map(|r| (r.instance.clone(), r.active_context.clone()))
            .collect();

        // Phase 3: services.
        if failed {
            phase_results.push(PhaseResult::skipped(Phase::Services));
        } else {
            let work = plan.instances.iter().enumerate();
            let installed = run_phase(concurrency, work, |slot, ip| {
                self.install_services(slot, ip, contexts.get(ip.name()))
            })
            .await;
            let (_, failures) = Self::absorb(&mut ledger, Phase::Services, installed);
            failed = !failures.is_empty();
            phase_results.push(PhaseResult::finished(Phase::Services, failures));
        }

        let rollback = if failed {
            warn!(entries = ledger.len(), "deployment failed, rolling back");
            Some(self.rollback(plan, &ledger, &contexts).await)
        } else {
            info!(entries = ledger.len(), "deployment complete");
            None
        };

        Ok(DeploymentResult {
            plan: plan.name.clone(),
            dry_run: false,
            ledger: ledger.entries(),
            phase_results,
            runs,
            rollback,
        })
    }

    fn dry_run(plan: &DeploymentPlan, profiles: &[SecurityProfile]) -> DeploymentResult {
        let mut ledger = ResourceLedger::new();
        for (slot, (ip, profile)) in plan.instances.iter().zip(profiles).enumerate() {
            ledger.append(Phase::Infrastructure, slot, planned_infrastructure(ip, profile));
            ledger.append(Phase::Hardening, slot, planned_hardening(ip));
            ledger.append(
                Phase::Services,
                slot,
                ip.services.iter().map(|s| service_entry(ip, s)),
            );
        }
        DeploymentResult {
            plan: plan.name.clone(),
            dry_run: true,
            ledger: ledger.entries(),
            phase_results: Phase::ALL
                .iter()
                .map(|&phase| PhaseResult {
                    phase,
                    status: PhaseStatus::Planned,
                    failures: Vec::new(),
                })
                .collect(),
            runs: Vec::new(),
            rollback: None,
        }
    }

    /// Harden one existing instance from `plan`, outside a deployment.
    ///
    /// The instance's management port is opened in the ACL first (an
    /// idempotent call); the pipeline's gate still checks it independently.
    ///
    /// # Errors
    ///
    /// Returns an error if the plan is invalid, names no such instance, or
    /// the instance cannot be located. Pipeline failures are in the run.
    #[instrument(skip(self, plan, cancel))]
    pub async fn harden_instance(
        &self,
        plan: &DeploymentPlan,
        name: &str,
        address: Option<&str>,
        cancel: &CancelToken,
    ) -> anyhow::Result<PipelineRun> {
        let profiles = plan.resolve()?;
        let slot = plan
            .instances
            .iter()
            .position(|i| i.name() == name)
            .ok_or_else(|| PlanError::UnknownInstance(name.to_string()))?;
        let ip = &plan.instances[slot];
        let profile = &profiles[slot];

        let instance = match address {
            Some(addr) => Instance {
                id: name.to_string(),
                public_address: Some(addr.to_string()),
                lifecycle_state: bulwark_common::LifecycleState::Running,
                address_mode: bulwark_common::AddressMode::Ephemeral,
            },
            None => {
                let located = Instance {
                    id: name.to_string(),
                    public_address: None,
                    lifecycle_state: bulwark_common::LifecycleState::Provisioning,
                    address_mode: bulwark_common::AddressMode::Ephemeral,
                };
                self.tracker
                    .wait_until_running(&located, self.options.ready_timeout)
                    .await?
            }
        };
        if let Some(port) = profile.management_port {
            self.tracker
                .open_port(name, &PortRule::public(port, Protocol::Tcp))
                .await?;
        }
        let outcome = self.harden_one(slot, ip, profile, Some(&instance), cancel).await;
        outcome.result.map_err(anyhow::Error::msg)
    }

    // ── Phase plumbing ───────────────────────────────────────────────────────

    /// Append every outcome's entries to the ledger; return successes by
    /// slot and the failures.
    fn absorb<O>(
        ledger: &mut ResourceLedger,
        phase: Phase,
        outcomes: Vec<HostOutcome<O>>,
    ) -> (Vec<Option<O>>, Vec<InstanceFailure>) {
        let mut values: Vec<Option<O>> = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            ledger.append(phase, outcome.slot, outcome.entries);
            if values.len() <= outcome.slot {
                values.resize_with(outcome.slot + 1, || None);
            }
            match outcome.result {
                Ok(value) => values[outcome.slot] = Some(value),
                Err(message) => failures.push(InstanceFailure {
                    instance: outcome.instance,
                    message,
                }),
            }
        }
        failures.sort_by(|a, b| a.instance.cmp(&b.instance));
        (values, failures)
    }

    async fn provision_one(
        &self,
        slot: usize,
        plan: &InstancePlan,
        profile: &SecurityProfile,
    ) -> HostOutcome<Instance> {
        let mut entries = Vec::new();
        self.reporter.step(&format!("{}: provisioning", plan.name()));
        let result = self
            .provision_steps(plan, profile, &mut entries)
            .await
            .map_err(|e| e.to_string());
        match &result {
            Ok(_) => self.reporter.success(&format!("{}: infrastructure ready", plan.name())),
            Err(message) => self.reporter.warn(&format!("{}: {message}", plan.name())),
        }
        HostOutcome {
            slot,
            instance: plan.name().to_string(),
            entries,
            result,
        }
    }

    async fn provision_steps(
        &self,
        plan: &InstancePlan,
        profile: &SecurityProfile,
        entries: &mut Vec<LedgerEntry>,
    ) -> Result<Instance, HardenError> {
        let name = plan.name();
        let requested = self.tracker.provision(&plan.spec).await?;
        entries.push(LedgerEntry::new(ResourceType::Instance, name, Phase::Infrastructure, name));
        let mut instance = self
            .tracker
            .wait_until_running(&requested, self.options.ready_timeout)
            .await?;

        if let Some(address) = &plan.static_address {
            self.tracker.allocate_persistent_address(address).await?;
            entries.push(LedgerEntry::new(ResourceType::StaticAddress, address, Phase::Infrastructure, name));
            instance = self.tracker.bind_address(address, &instance).await?;
        }
        for rule in acl_rules(profile) {
            self.tracker.open_port(name, &rule).await?;
            entries.push(LedgerEntry::new(ResourceType::AclPort, rule.resource_id(), Phase::Infrastructure, name));
        }
        Ok(instance)
    }

    async fn harden_one(
        &self,
        slot: usize,
        plan: &InstancePlan,
        profile: &SecurityProfile,
        instance: Option<&Instance>,
        cancel: &CancelToken,
    ) -> HostOutcome<PipelineRun> {
        let Some((instance, address)) =
            instance.and_then(|i| i.public_address.clone().map(|a| (i, a)))
        else {
            return HostOutcome::failed(slot, plan.name(), "instance has no public address".to_string());
        };
        let request = HardeningRequest {
            instance,
            profile,
            bootstrap: ConnectionContext::new(address, plan.bootstrap.port, plan.bootstrap.credential()),
            target: plan.credential.clone(),
        };
        let run = self.pipeline().run(&request, cancel).await;
        HostOutcome {
            slot,
            instance: plan.name().to_string(),
            entries: run.effects.clone(),
            result: Ok(run),
        }
    }

    async fn install_services(
        &self,
        slot: usize,
        plan: &InstancePlan,
        context: Option<&ConnectionContext>,
    ) -> HostOutcome<()> {
        let Some(ctx) = context else {
            return HostOutcome::failed(slot, plan.name(), "no management channel".to_string());
        };
        let mut entries = Vec::new();
        for service in &plan.services {
            self.reporter
                .step(&format!("{}: installing {}", plan.name(), service.name));
            if let Err(message) = self.run_batch(ctx, &service.install).await {
                self.reporter.warn(&format!("{}: {}: {message}", plan.name(), service.name));
                return HostOutcome {
                    slot,
                    instance: plan.name().to_string(),
                    entries,
                    result: Err(format!("service {}: {message}", service.name)),
                };
            }
            entries.push(service_entry(plan, service));
        }
        HostOutcome {
            slot,
            instance: plan.name().to_string(),
            entries,
            result: Ok(()),
        }
    }

    /// Run commands over `ctx`, retrying dropped connections.
    async fn run_batch(&self, ctx: &ConnectionContext, commands: &[String]) -> Result<(), String> {
        if commands.is_empty() {
            return Ok(());
        }
        let batch = CommandBatch::new(commands.to_vec(), self.options.hardening.command_timeout);
        let outcome = with_retry(
            self.options.hardening.retry,
            "remote batch",
            ExecError::is_transient,
            || self.executor.run(ctx, &batch),
        )
        .await
        .map_err(|e| e.to_string())?;
        if outcome.success() {
            return Ok(());
        }
        let index = outcome.failed_at.unwrap_or(0);
        Err(format!(
            "`{}` exited with {}: {}",
            batch.commands.get(index).map_or("", String::as_str),
            outcome.exit_code,
            outcome.stderr.trim()
        ))
    }

    // ── Rollback ─────────────────────────────────────────────────────────────

    /// Undo every ledger entry in reverse. Failures are collected and never
    /// stop the remaining steps.
    #[instrument(skip_all, fields(entries = ledger.len()))]
    async fn rollback(
        &self,
        plan: &DeploymentPlan,
        ledger: &ResourceLedger,
        contexts: &HashMap<String, ConnectionContext>,
    ) -> RollbackReport {
        let mut report = RollbackReport::default();
        for entry in ledger.rollback_order() {
            self.reporter.step(&format!("rollback: {entry}"));
            match self.undo(plan, &entry, contexts).await {
                Ok(()) => {
                    info!(entry = %entry, "undone");
                    report.undone.push(entry);
                }
                Err(message) => {
                    warn!(entry = %entry, %message, "rollback step failed");
                    self.reporter.warn(&format!("rollback of {entry} failed: {message}"));
                    report.errors.push(RollbackError { entry, message });
                }
            }
        }
        report
    }

    async fn undo(
        &self,
        plan: &DeploymentPlan,
        entry: &LedgerEntry,
        contexts: &HashMap<String, ConnectionContext>,
    ) -> Result<(), String> {
        let host = |commands: Vec<String>| async move {
            let ctx = contexts
                .get(&entry.instance)
                .ok_or_else(|| format!("no management channel to {}", entry.instance))?;
            self.run_batch(ctx, &commands).await
        };
        match entry.resource_type {
            ResourceType::Instance => self
                .tracker
                .terminate(&entry.resource_id)
                .await
                .map_err(|e| e.to_string()),
            ResourceType::StaticAddress => self
                .tracker
                .release_address(&entry.resource_id)
                .await
                .map_err(|e| e.to_string()),
            ResourceType::AclPort => {
                let rule = PortRule::from_resource_id(&entry.resource_id)
                    .ok_or_else(|| format!("unreadable port rule '{}'", entry.resource_id))?;
                self.tracker
                    .close_port(&entry.instance, &rule)
                    .await
                    .map_err(|e| e.to_string())
            }
            ResourceType::HostFilter => host(firewall::teardown_commands()).await,
            ResourceType::IntrusionGuard => host(guard::teardown_commands()).await,
            ResourceType::CompletionMarker => host(marker::teardown_commands()).await,
            ResourceType::Service => {
                let uninstall = plan
                    .find(&entry.instance)
                    .and_then(|i| i.services.iter().find(|s| s.name == entry.resource_id))
                    .map(|s| s.uninstall.clone())
                    .unwrap_or_default();
                host(uninstall).await
            }
        }
    }
}

impl PhaseResult {
    fn finished(phase: Phase, failures: Vec<InstanceFailure>) -> Self {
        let status = if failures.is_empty() {
            PhaseStatus::Succeeded
        } else {
            PhaseStatus::Failed
        };
        Self {
            phase,
            status,
            failures,
        }
    }

    fn skipped(phase: Phase) -> Self {
        Self {
            phase,
            status: PhaseStatus::Skipped,
            failures: Vec::new(),
        }
    }
}
