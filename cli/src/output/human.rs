//! Human-readable terminal renderer.

use std::path::Path;

use bulwark_common::{FailureRecord, PipelineStatus, StatusReport, VerificationRecord};
use owo_colors::OwoColorize as _;

use crate::application::services::orchestrator::{DeploymentResult, PhaseStatus};
use crate::domain::PipelineRun;
use crate::domain::config::{BulwarkConfig, VALID_CONFIG_KEYS};
use crate::domain::firewall::{self, FilterRule, IpFamily};
use crate::output::OutputContext;

/// Renders domain types as human-readable terminal output using `OutputContext`.
pub struct HumanRenderer<'a> {
    ctx: &'a OutputContext,
}

impl<'a> HumanRenderer<'a> {
    #[must_use]
    pub fn new(ctx: &'a OutputContext) -> Self {
        Self { ctx }
    }

    pub fn render_version(&self, version: &str) {
        if !self.ctx.quiet {
            println!("bulwark {version}");
        }
    }

    pub fn render_config(&self, config: &BulwarkConfig, path: &Path) {
        println!();
        println!(
            "  {}",
            format!("Configuration ({})", path.display()).style(self.ctx.styles.header)
        );
        println!();
        for key in VALID_CONFIG_KEYS {
            let value = config.get(key).unwrap_or_default();
            let value = if value.is_empty() { "(not set)".to_string() } else { value };
            println!("  {:<24} {value}", format!("{key}:"));
        }
        println!();
        println!("  {}", "Environment:".style(self.ctx.styles.bold));
        for var in ["BULWARK_CONFIG", "BULWARK_LOG", "NO_COLOR"] {
            println!(
                "    {:<18} {}",
                format!("{var}:"),
                std::env::var(var).unwrap_or_else(|_| "(not set)".to_string())
            );
        }
        println!();
    }

    pub fn render_setting(&self, key: &str, value: &str) {
        self.ctx.success(&format!("Set {key} = {value}"));
    }

    pub fn render_status(&self, report: &StatusReport) {
        self.ctx.kv("Instance:", &report.instance);
        self.ctx.kv(
            "Stage:",
            &format!(
                "{} ({})",
                report.stage.style(self.ctx.styles.stage),
                report.stage.description()
            ),
        );
        self.ctx.kv("Status:", report.status.as_str());
        if let Some(at) = report.completed_at {
            self.ctx.kv("Completed:", &at.to_rfc3339());
        }
        if let Some(check) = &report.last_verification {
            self.render_check(check);
        }
        if report.is_locked_out {
            self.ctx
                .error("Management channel does not answer; the host may be locked out");
        } else {
            self.ctx.success("Management channel answers");
        }
        if let Some(failure) = &report.failure {
            self.render_failure(failure);
        }
    }

    pub fn render_run(&self, run: &PipelineRun) {
        self.ctx.kv("Instance:", &run.instance);
        self.ctx.kv("Profile:", &run.profile);
        self.ctx.kv(
            "Stage:",
            &run.stage.style(self.ctx.styles.stage).to_string(),
        );
        self.ctx.kv("Channel:", &run.active_context.to_string());
        if let Some(check) = run.last_verification() {
            self.render_check(check);
        }
        match (&run.status, &run.failure) {
            (PipelineStatus::Succeeded, _) => self.ctx.success("Host hardened"),
            (_, Some(failure)) => self.render_failure(failure),
            (status, None) => self.ctx.warn(&format!("Run ended {status}")),
        }
    }

    pub fn render_deployment(&self, result: &DeploymentResult) {
        let title = if result.dry_run {
            format!("Deployment plan '{}' (dry run)", result.plan)
        } else {
            format!("Deployment '{}'", result.plan)
        };
        self.ctx.header(&title);
        for phase in &result.phase_results {
            let label = format!("{} {}", phase.phase, phase_status(phase.status));
            match phase.status {
                PhaseStatus::Succeeded => self.ctx.success(&label),
                PhaseStatus::Failed => self.ctx.error(&label),
                PhaseStatus::Skipped => self.ctx.warn(&label),
                PhaseStatus::Planned => self.ctx.info(&label),
            }
            for failure in &phase.failures {
                self.ctx.error(&format!("  {}: {}", failure.instance, failure.message));
            }
        }

        if !self.ctx.quiet && !result.ledger.is_empty() {
            println!();
            let heading = if result.dry_run { "Planned effects:" } else { "Effects:" };
            self.ctx.header(heading);
            for entry in &result.ledger {
                println!(
                    "    {:<10} {:<18} {}",
                    entry.instance,
                    entry.resource_type.to_string().style(self.ctx.styles.dim),
                    entry.resource_id
                );
            }
        }

        if let Some(rollback) = &result.rollback {
            println!();
            self.ctx.header("Rollback:");
            self.ctx
                .info(&format!("{} effects undone", rollback.undone.len()));
            for error in &rollback.errors {
                self.ctx.error(&error.to_string());
            }
        }
    }

    pub fn render_rules(&self, profile: &str, rules: &[FilterRule], family: IpFamily) {
        if self.ctx.quiet {
            print!("{}", firewall::render(rules, family));
            return;
        }
        self.ctx.kv("Profile:", profile);
        self.ctx.kv("Fingerprint:", &firewall::fingerprint(rules));
        println!();
        print!("{}", firewall::render(rules, family));
    }

    fn render_check(&self, check: &VerificationRecord) {
        let line = format!("{} ({}): {}", check.check, check.stage, check.detail);
        if check.passed {
            self.ctx.success(&line);
        } else {
            self.ctx.warn(&line);
        }
    }

    fn render_failure(&self, failure: &FailureRecord) {
        self.ctx.error(&format!(
            "{} failed: {}",
            failure.attempted_stage.description(),
            failure.message
        ));
        self.ctx.info(&format!("Hint: {}", failure.hint));
    }
}

fn phase_status(status: PhaseStatus) -> &'static str {
    match status {
        PhaseStatus::Succeeded => "succeeded",
        PhaseStatus::Failed => "failed",
        PhaseStatus::Skipped => "skipped",
        PhaseStatus::Planned => "planned",
    }
}
