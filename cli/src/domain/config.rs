//! Domain types and validators for Bulwark configuration.
//!
//! Pure functions only: no I/O, no async, no filesystem access.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;

// ── Constants ────────────────────────────────────────────────────────────────

pub const VALID_CONFIG_KEYS: &[&str] = &[
    "cloud.region",
    "cloud.profile",
    "concurrency",
    "retry.attempts",
    "retry.backoff_ms",
    "timeouts.command_secs",
    "timeouts.ready_secs",
    "timeouts.gate_secs",
];

// ── Config schema ────────────────────────────────────────────────────────────

/// Top-level configuration stored in `~/.bulwark/config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulwarkConfig {
    pub cloud: CloudConfig,
    /// Hosts worked on at once within a phase.
    pub concurrency: usize,
    pub retry: RetryConfig,
    pub timeouts: TimeoutConfig,
}

impl Default for BulwarkConfig {
    fn default() -> Self {
        Self {
            cloud: CloudConfig::default(),
            concurrency: 4,
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Cloud provider selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub region: String,
    /// Named credential profile; the provider's default chain when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            profile: None,
        }
    }
}

/// Bounded retry for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    /// First backoff; doubles on every retry.
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 4,
            backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Budget for one remote command batch.
    pub command_secs: u64,
    /// Budget for an instance to reach `running`.
    pub ready_secs: u64,
    /// Budget for the cloud ACL to expose the management port.
    pub gate_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command_secs: 300,
            ready_secs: 600,
            gate_secs: 120,
        }
    }
}

impl TimeoutConfig {
    #[must_use]
    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    #[must_use]
    pub fn ready(&self) -> Duration {
        Duration::from_secs(self.ready_secs)
    }

    #[must_use]
    pub fn gate(&self) -> Duration {
        Duration::from_secs(self.gate_secs)
    }
}

impl BulwarkConfig {
    /// Current value of a whitelisted key, for display.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        Some(match key {
            "cloud.region" => self.cloud.region.clone(),
            "cloud.profile" => self.cloud.profile.clone().unwrap_or_default(),
            "concurrency" => self.concurrency.to_string(),
            "retry.attempts" => self.retry.attempts.to_string(),
            "retry.backoff_ms" => self.retry.backoff_ms.to_string(),
            "timeouts.command_secs" => self.timeouts.command_secs.to_string(),
            "timeouts.ready_secs" => self.timeouts.ready_secs.to_string(),
            "timeouts.gate_secs" => self.timeouts.gate_secs.to_string(),
            _ => return None,
        })
    }

    /// Set a key after validating it.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value is invalid.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        validate_config_key(key)?;
        validate_config_value(key, value)?;
        match key {
            "cloud.region" => self.cloud.region = value.to_string(),
            "cloud.profile" => self.cloud.profile = Some(value.to_string()),
            "concurrency" => self.concurrency = value.parse()?,
            "retry.attempts" => self.retry.attempts = value.parse()?,
            "retry.backoff_ms" => self.retry.backoff_ms = value.parse()?,
            "timeouts.command_secs" => self.timeouts.command_secs = value.parse()?,
            "timeouts.ready_secs" => self.timeouts.ready_secs = value.parse()?,
            "timeouts.gate_secs" => self.timeouts.gate_secs = value.parse()?,
            _ => anyhow::bail!("Unknown setting: {key}"),
        }
        Ok(())
    }
}

// ── Validators ───────────────────────────────────────────────────────────────

/// Validates a configuration key against the whitelist.
///
/// # Errors
///
/// Returns an error if the key is not in the allowed list.
pub fn validate_config_key(key: &str) -> Result<()> {
    if !VALID_CONFIG_KEYS.contains(&key) {
        return Err(ConfigError::UnknownKey {
            key: key.to_string(),
            valid: VALID_CONFIG_KEYS.join(", "),
        }
        .into());
    }
    Ok(())
}

/// Validates a configuration value for the given key.
///
/// # Errors
///
/// Returns an error if the value is not valid for the key.
pub fn validate_config_value(key: &str, value: &str) -> Result<()> {
    let invalid = |expected: &str| -> anyhow::Error {
        ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            expected: expected.to_string(),
        }
        .into()
    };
    let in_range = |lo: u64, hi: u64| value.parse::<u64>().is_ok_and(|n| (lo..=hi).contains(&n));

    match key {
        "cloud.region" => {
            let parts: Vec<&str> = value.split('-').collect();
            let ok = parts.len() == 3
                && parts[0].len() == 2
                && parts.iter().all(|p| !p.is_empty())
                && parts[..2].iter().all(|p| p.chars().all(|c| c.is_ascii_lowercase()))
                && parts[2].chars().all(|c| c.is_ascii_digit());
            if !ok {
                return Err(invalid("a region such as eu-central-1"));
            }
        }
        "cloud.profile" => {
            if value.is_empty() || value.chars().any(char::is_whitespace) {
                return Err(invalid("a profile name without whitespace"));
            }
        }
        "concurrency" if !in_range(1, 64) => return Err(invalid("an integer from 1 to 64")),
        "retry.attempts" if !in_range(1, 10) => return Err(invalid("an integer from 1 to 10")),
        "retry.backoff_ms" if !in_range(10, 60_000) => {
            return Err(invalid("milliseconds from 10 to 60000"));
        }
        "timeouts.command_secs" | "timeouts.ready_secs" | "timeouts.gate_secs"
            if !in_range(1, 3600) =>
        {
            return Err(invalid("seconds from 1 to 3600"));
        }
        _ => {}
    }
    Ok(())
}

// ── Unit tests ───────────────────────────────────────────────────────────────
