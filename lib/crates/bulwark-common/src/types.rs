use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stage of a hardening run, in execution order.
///
/// The derived ordering follows the pipeline, so `stage >= ChannelMigrated`
/// means the irreversible channel migration has already happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardeningStage {
    Created,
    BaselineApplied,
    FilterInstalled,
    PortVerifiedOpen,
    ChannelMigrated,
    IntrusionGuardActive,
    Complete,
}

impl HardeningStage {
    /// All stages in pipeline order.
    pub const ALL: [Self; 7] = [
        Self::Created,
        Self::BaselineApplied,
        Self::FilterInstalled,
        Self::PortVerifiedOpen,
        Self::ChannelMigrated,
        Self::IntrusionGuardActive,
        Self::Complete,
    ];

    /// The stage that follows this one, or `None` for `Complete`.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Created => Some(Self::BaselineApplied),
            Self::BaselineApplied => Some(Self::FilterInstalled),
            Self::FilterInstalled => Some(Self::PortVerifiedOpen),
            Self::PortVerifiedOpen => Some(Self::ChannelMigrated),
            Self::ChannelMigrated => Some(Self::IntrusionGuardActive),
            Self::IntrusionGuardActive => Some(Self::Complete),
            Self::Complete => None,
        }
    }

    /// Human-readable description of the work that reaches this stage.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Created => "Run created",
            Self::BaselineApplied => "Applying kernel and network baseline",
            Self::FilterInstalled => "Installing host packet filter",
            Self::PortVerifiedOpen => "Verifying management port at the cloud layer",
            Self::ChannelMigrated => "Migrating management channel",
            Self::IntrusionGuardActive => "Activating intrusion guard",
            Self::Complete => "Final verification",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::BaselineApplied => "baseline_applied",
            Self::FilterInstalled => "filter_installed",
            Self::PortVerifiedOpen => "port_verified_open",
            Self::ChannelMigrated => "channel_migrated",
            Self::IntrusionGuardActive => "intrusion_guard_active",
            Self::Complete => "complete",
        }
    }

    /// Whether the administrative channel has already been migrated.
    #[must_use]
    pub fn is_past_migration(self) -> bool {
        self >= Self::ChannelMigrated
    }
}

impl fmt::Display for HardeningStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl PipelineStatus {
    /// Terminal runs are never resumed automatically.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a cloud instance as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Provisioning,
    Running,
    Stopping,
    Stopped,
    Terminated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Terminated => "terminated",
        })
    }
}

/// How an instance's public address is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressMode {
    #[default]
    Ephemeral,
    Static,
}

/// Deployment phase, executed strictly in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Infrastructure,
    Hardening,
    Services,
}

impl Phase {
    pub const ALL: [Self; 3] = [Self::Infrastructure, Self::Hardening, Self::Services];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Infrastructure => "infrastructure",
            Self::Hardening => "hardening",
            Self::Services => "services",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of resource recorded in the deployment ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Instance,
    StaticAddress,
    AclPort,
    HostFilter,
    IntrusionGuard,
    CompletionMarker,
    Service,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Instance => "instance",
            Self::StaticAddress => "static_address",
            Self::AclPort => "acl_port",
            Self::HostFilter => "host_filter",
            Self::IntrusionGuard => "intrusion_guard",
            Self::CompletionMarker => "completion_marker",
            Self::Service => "service",
        })
    }
}

/// A resource created by a successful deployment effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub resource_type: ResourceType,
    /// Provider or host-level identifier (e.g. `6677/tcp`, an address name).
    pub resource_id: String,
    pub phase: Phase,
    /// Instance the resource belongs to.
    pub instance: String,
}

impl LedgerEntry {
    #[must_use]
    pub fn new(
        resource_type: ResourceType,
        resource_id: impl Into<String>,
        phase: Phase,
        instance: impl Into<String>,
    ) -> Self {
        Self {
            resource_type,
            resource_id: resource_id.into(),
            phase,
            instance: instance.into(),
        }
    }
}

impl fmt::Display for LedgerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} ({}, {})",
            self.resource_type, self.resource_id, self.instance, self.phase
        )
    }
}

/// One check performed by the pipeline, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    /// Stage the check belongs to.
    pub stage: HardeningStage,
    /// Short check identifier, e.g. `acl_exposes_port`.
    pub check: String,
    pub passed: bool,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// Classification of a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Provider,
    Timeout,
    TerminalState,
    Verification,
    ChannelMigration,
    CommandFailed,
    Unreachable,
    UnsafeProfile,
    Cancelled,
    Invariant,
}

/// Why a run stopped, with enough context for an operator to choose between
/// a blind retry and manual intervention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    /// Stage that was being attempted when the run stopped.
    pub attempted_stage: HardeningStage,
    pub message: String,
    pub hint: String,
}

/// Read-only status of a host, safe for dashboards and the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub instance: String,
    /// Last completed stage.
    pub stage: HardeningStage,
    pub status: PipelineStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verification: Option<VerificationRecord>,
    pub is_locked_out: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
    /// Completion time recorded on the host, when the marker is readable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}
