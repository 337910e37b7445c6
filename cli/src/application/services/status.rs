//! Application service: read-only hardening status.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.

use std::time::Duration;

use anyhow::Result;
use bulwark_common::{HardeningStage, StatusReport};
use tracing::{debug, instrument};

use crate::application::ports::{PipelineRunStore, RemoteExecutor};
use crate::domain::marker::{self, CompletionMarker};
use crate::domain::CommandBatch;

/// Report how far `instance` got and whether its channel still answers.
///
/// Returns `Ok(None)` if the instance was never hardened. The only remote
/// commands are a no-op and, for completed runs, a read of the marker.
///
/// # Errors
///
/// Returns an error if the run record cannot be read.
#[instrument(skip(store, executor))]
pub async fn instance_status(
    store: &impl PipelineRunStore,
    executor: &impl RemoteExecutor,
    instance: &str,
    timeout: Duration,
) -> Result<Option<StatusReport>> {
    let Some(run) = store.load_async(instance).await? else {
        return Ok(None);
    };

    let is_locked_out = match executor.run(&run.active_context, &CommandBatch::noop(timeout)).await {
        Ok(outcome) => !outcome.success(),
        Err(e) => {
            debug!(error = %e, "active channel did not answer");
            true
        }
    };
    let mut report = run.report(is_locked_out);

    if !is_locked_out && run.stage == HardeningStage::Complete {
        let batch = CommandBatch::new(vec![marker::read_command()], timeout);
        if let Ok(outcome) = executor.run(&run.active_context, &batch).await {
            report.completed_at = CompletionMarker::parse(&outcome.stdout).map(|m| m.completed_at);
        }
    }
    Ok(Some(report))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::application::ports::PipelineRunStore;
    use crate::application::services::test_support::{
        FakeHosts, MemoryRunStore, admin_credential, bootstrap_credential,
    };
    use crate::domain::pipeline::gate_check;
    use crate::domain::{ConnectionContext, HardenError, PipelineRun};
    use bulwark_common::PipelineStatus;
    use chrono::{TimeZone, Utc};

    const ADDR: &str = "203.0.113.20";

    fn failed_before_migration() -> PipelineRun {
        let mut run = PipelineRun::new("edge-b", "bastion", ConnectionContext::new(ADDR, 22, bootstrap_credential()));
        run.start(6677).unwrap();
        run.advance(HardeningStage::BaselineApplied).unwrap();
        run.advance(HardeningStage::FilterInstalled).unwrap();
        run.record_verification(HardeningStage::PortVerifiedOpen, "port_exposed:6677/tcp", false, "closed");
        run.fail(&HardenError::Verification("closed".into()));
        run
    }

    fn completed() -> PipelineRun {
        let mut run = PipelineRun::new("edge-b", "bastion", ConnectionContext::new(ADDR, 22, bootstrap_credential()));
        run.start(6677).unwrap();
        run.advance(HardeningStage::BaselineApplied).unwrap();
        run.advance(HardeningStage::FilterInstalled).unwrap();
        run.record_verification(HardeningStage::PortVerifiedOpen, gate_check(6677), true, "open");
        run.advance(HardeningStage::PortVerifiedOpen).unwrap();
        run.active_context = ConnectionContext::new(ADDR, 6677, admin_credential());
        run.advance(HardeningStage::ChannelMigrated).unwrap();
        run.advance(HardeningStage::IntrusionGuardActive).unwrap();
        run.advance(HardeningStage::Complete).unwrap();
        run
    }

    /// Host that migrated to 6677, optionally carrying a completion marker.
    fn migrated_host(marker: Option<&CompletionMarker>) -> FakeHosts {
        let hosts = FakeHosts::default();
        hosts.with(ADDR, |h| {
            h.listening = vec![6677];
            if let Some(marker) = marker {
                h.files.insert(
                    marker::MARKER_PATH.to_string(),
                    serde_json::to_string_pretty(marker).unwrap(),
                );
            }
        });
        hosts
    }

    #[tokio::test]
    async fn test_completed_run_reports_marker_time() {
        let store = MemoryRunStore::default();
        store.save_async(&completed()).await.unwrap();
        let completed_at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap();
        let hosts = migrated_host(Some(&CompletionMarker {
            profile: "bastion".into(),
            rule_fingerprint: "ab".repeat(32),
            management_port: 6677,
            completed_at,
            bulwark_version: "0.1.0".into(),
        }));

        let report = instance_status(&store, &hosts, "edge-b", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.stage, HardeningStage::Complete);
        assert_eq!(report.status, PipelineStatus::Succeeded);
        assert!(!report.is_locked_out);
        assert_eq!(report.completed_at, Some(completed_at));
        assert_eq!(hosts.commands(ADDR), vec!["true".to_string(), marker::read_command()]);
    }

    #[tokio::test]
    async fn test_completed_run_without_marker_has_no_completion_time() {
        let store = MemoryRunStore::default();
        store.save_async(&completed()).await.unwrap();
        let report = instance_status(&store, &migrated_host(None), "edge-b", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.status, PipelineStatus::Succeeded);
        assert!(!report.is_locked_out);
        assert_eq!(report.completed_at, None);
    }

    #[tokio::test]
    async fn test_unknown_instance_has_no_status() {
        let report = instance_status(&MemoryRunStore::default(), &FakeHosts::default(), "ghost", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn test_failed_gate_is_not_a_lockout() {
        let store = MemoryRunStore::default();
        store.save_async(&failed_before_migration()).await.unwrap();
        let report = instance_status(&store, &FakeHosts::default(), "edge-b", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.stage, HardeningStage::FilterInstalled);
        assert_eq!(report.status, PipelineStatus::Failed);
        assert!(!report.is_locked_out);
        assert!(!report.last_verification.unwrap().passed);
    }

    #[tokio::test]
    async fn test_dead_channel_reports_lockout() {
        let store = MemoryRunStore::default();
        store.save_async(&failed_before_migration()).await.unwrap();
        let hosts = FakeHosts::default();
        hosts.with(ADDR, |h| h.listening = vec![6677]);
        let report = instance_status(&store, &hosts, "edge-b", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert!(report.is_locked_out);
    }

    #[tokio::test]
    async fn test_status_sends_only_read_commands() {
        let store = MemoryRunStore::default();
        store.save_async(&failed_before_migration()).await.unwrap();
        let hosts = FakeHosts::default();
        instance_status(&store, &hosts, "edge-b", Duration::from_secs(1)).await.unwrap();
        assert_eq!(hosts.commands(ADDR), vec!["true".to_string()]);
    }
}
