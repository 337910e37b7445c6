//! JSON output helpers.
//!
//! `JsonRenderer` prints one pretty-printed document per command on stdout.
//! Failures use the error object from [`format_error`].

use std::path::Path;

use anyhow::{Context, Result};
use bulwark_common::StatusReport;
use serde::Serialize;
use serde_json::json;

use crate::application::services::orchestrator::DeploymentResult;
use crate::domain::PipelineRun;
use crate::domain::config::BulwarkConfig;
use crate::domain::firewall::{self, FilterRule, IpFamily};

/// Format a JSON error object.
///
/// Output (pretty-printed):
/// ```json
/// {
///   "error": true,
///   "message": "...",
///   "code": "..."
/// }
/// ```
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn format_error(message: &str, code: &str) -> Result<String> {
    let obj = json!({
        "error": true,
        "message": message,
        "code": code,
    });
    serde_json::to_string_pretty(&obj).context("JSON serialization failed")
}

pub struct JsonRenderer;

impl JsonRenderer {
    fn print(value: &impl Serialize) -> Result<()> {
        println!(
            "{}",
            serde_json::to_string_pretty(value).context("JSON serialization failed")?
        );
        Ok(())
    }

    pub fn render_version(version: &str) -> Result<()> {
        Self::print(&json!({ "version": version }))
    }

    pub fn render_config(config: &BulwarkConfig, path: &Path) -> Result<()> {
        Self::print(&json!({
            "path": path.display().to_string(),
            "config": config,
        }))
    }

    pub fn render_setting(key: &str, value: &str) -> Result<()> {
        Self::print(&json!({ "key": key, "value": value }))
    }

    pub fn render_status(report: &StatusReport) -> Result<()> {
        Self::print(report)
    }

    pub fn render_run(run: &PipelineRun) -> Result<()> {
        Self::print(run)
    }

    pub fn render_deployment(result: &DeploymentResult) -> Result<()> {
        Self::print(&json!({
            "succeeded": result.succeeded(),
            "result": result,
        }))
    }

    pub fn render_rules(profile: &str, rules: &[FilterRule]) -> Result<()> {
        Self::print(&json!({
            "profile": profile,
            "fingerprint": firewall::fingerprint(rules),
            "rules": rules,
            "rendered": {
                "v4": firewall::render(rules, IpFamily::V4),
                "v6": firewall::render(rules, IpFamily::V6),
            },
        }))
    }
}
