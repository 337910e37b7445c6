//! Hardening run record and its transition rules.
//!
//! `PipelineRun` is the single source of truth for how far a host got. It
//! refuses transitions that skip a stage and refuses `ChannelMigrated`
//! unless the same run holds a passed gate record for the target port.

use bulwark_common::{
    FailureRecord, HardeningStage, LedgerEntry, PipelineStatus, StatusReport, VerificationRecord,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::connection::ConnectionContext;
use crate::domain::error::HardenError;

/// Verification-log check name for the cross-layer gate on `port`.
#[must_use]
pub fn gate_check(port: u16) -> String {
    format!("port_exposed:{port}/tcp")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub instance: String,
    pub profile: String,
    /// Last completed stage.
    pub stage: HardeningStage,
    pub status: PipelineStatus,
    pub target_port: Option<u16>,
    /// The one trusted channel to the host right now.
    pub active_context: ConnectionContext,
    #[serde(default)]
    pub verification_log: Vec<VerificationRecord>,
    /// Reversible effects that completed, in order.
    #[serde(default)]
    pub effects: Vec<LedgerEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    #[must_use]
    pub fn new(instance: &str, profile: &str, context: ConnectionContext) -> Self {
        Self {
            instance: instance.to_string(),
            profile: profile.to_string(),
            stage: HardeningStage::Created,
            status: PipelineStatus::Pending,
            target_port: None,
            active_context: context,
            verification_log: Vec::new(),
            effects: Vec::new(),
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move from `Pending` to `Running`.
    ///
    /// # Errors
    ///
    /// Fails if the run already started or finished.
    pub fn start(&mut self, target_port: u16) -> Result<(), HardenError> {
        if self.status != PipelineStatus::Pending {
            return Err(HardenError::InvariantViolation(format!(
                "cannot start a run that is {}",
                self.status
            )));
        }
        self.status = PipelineStatus::Running;
        self.target_port = Some(target_port);
        Ok(())
    }

    /// The stage the run is attempting next.
    #[must_use]
    pub fn next_stage(&self) -> Option<HardeningStage> {
        self.stage.next()
    }

    /// Record completion of `to`.
    ///
    /// # Errors
    ///
    /// Fails if the run is not running, `to` is not the next stage, or `to`
    /// is `ChannelMigrated` without a passed gate record for the target port.
    pub fn advance(&mut self, to: HardeningStage) -> Result<(), HardenError> {
        if self.status != PipelineStatus::Running {
            return Err(HardenError::InvariantViolation(format!(
                "cannot advance a run that is {}",
                self.status
            )));
        }
        if self.stage.next() != Some(to) {
            return Err(HardenError::InvariantViolation(format!(
                "cannot move from {} to {to}",
                self.stage
            )));
        }
        if to == HardeningStage::ChannelMigrated && !self.gate_passed() {
            return Err(HardenError::InvariantViolation(
                "channel migration requires a passed port-exposure check in this run".to_string(),
            ));
        }
        self.stage = to;
        if to == HardeningStage::Complete {
            self.status = PipelineStatus::Succeeded;
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Whether the gate for the target port passed in this run.
    #[must_use]
    pub fn gate_passed(&self) -> bool {
        let Some(port) = self.target_port else {
            return false;
        };
        let check = gate_check(port);
        self.verification_log.iter().any(|r| {
            r.stage == HardeningStage::PortVerifiedOpen && r.passed && r.check == check
        })
    }

    pub fn record_verification(
        &mut self,
        stage: HardeningStage,
        check: impl Into<String>,
        passed: bool,
        detail: impl Into<String>,
    ) {
        self.verification_log.push(VerificationRecord {
            stage,
            check: check.into(),
            passed,
            detail: detail.into(),
            at: Utc::now(),
        });
    }

    pub fn record_effect(&mut self, entry: LedgerEntry) {
        self.effects.push(entry);
    }

    /// End the run. Cancellation ends in `Aborted`, everything else in
    /// `Failed`; the completed stage is kept. A run that already ended keeps
    /// its outcome.
    pub fn fail(&mut self, error: &HardenError) {
        if self.status.is_terminal() {
            return;
        }
        let attempted = self.stage.next().unwrap_or(self.stage);
        self.status = if matches!(error, HardenError::Cancelled(_)) {
            PipelineStatus::Aborted
        } else {
            PipelineStatus::Failed
        };
        self.failure = Some(FailureRecord {
            kind: error.kind(),
            attempted_stage: attempted,
            message: error.to_string(),
            hint: error.remediation_hint(),
        });
        self.finished_at = Some(Utc::now());
    }

    #[must_use]
    pub fn last_verification(&self) -> Option<&VerificationRecord> {
        self.verification_log.last()
    }

    /// Read-only view for status consumers.
    #[must_use]
    pub fn report(&self, is_locked_out: bool) -> StatusReport {
        StatusReport {
            instance: self.instance.clone(),
            stage: self.stage,
            status: self.status,
            last_verification: self.last_verification().cloned(),
            is_locked_out,
            failure: self.failure.clone(),
            completed_at: None,
        }
    }
}
