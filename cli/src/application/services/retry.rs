//! Bounded exponential-backoff retry for transient failures.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::domain::config::RetryConfig;

/// How many times to try and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A policy that tries once.
    #[must_use]
    pub fn none() -> Self {
        Self {
            attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (0-based), doubling up to the cap.
    #[must_use]
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.min(16)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(RetryConfig::default())
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(cfg: RetryConfig) -> Self {
        Self {
            attempts: cfg.attempts.max(1),
            base_delay: Duration::from_millis(cfg.backoff_ms),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
///
/// Only errors for which `is_transient` returns `true` are retried; the
/// last error is returned unchanged.
///
/// # Errors
///
/// Returns the first permanent error, or the last transient one.
pub async fn with_retry<T, E, F, Fut>(
    policy: RetryPolicy,
    what: &str,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_transient(&e) && attempt + 1 < policy.attempts => {
                let delay = policy.delay(attempt);
                warn!(what, attempt = attempt + 1, error = %e, ?delay, "transient failure, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
