//! Backoff policy for transient connectivity failures
//!
//! Each retry waits a fixed minimum plus a random jitter drawn uniformly
//! from `0..=min(max_jitter, jitter_base * 2^attempt)`. Only errors for which
//! [`crate::FeedError::is_transient`] holds are retried; everything else is returned
//! immediately.
//!
//! ## Defaults
//!
//! - 3 s minimum wait
//! - jitter ceiling doubling from 1 s, capped at 7 s
//! - 10 attempts in total

use crate::error::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Fixed wait before every retry, in milliseconds
    pub min_wait_ms: u64,
    /// Jitter ceiling for the first retry, in milliseconds
    pub jitter_base_ms: u64,
    /// Upper bound of the jitter ceiling, in milliseconds
    pub max_jitter_ms: u64,
    /// Total attempts, including the first (0 behaves like 1)
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_wait_ms: 3_000,
            jitter_base_ms: 1_000,
            max_jitter_ms: 7_000,
            max_attempts: 10,
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Attempt budget, never below one
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Upper bound of the random jitter for a retry (0-indexed)
    pub fn jitter_ceiling(&self, attempt: u32) -> Duration {
        let exp = self.jitter_base_ms.saturating_mul(1u64 << attempt.min(20));
        Duration::from_millis(exp.min(self.max_jitter_ms))
    }

    /// Wait before a retry (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling = self.jitter_ceiling(attempt).as_millis() as u64;
        let jitter = rand::rng().random_range(0..=ceiling);
        Duration::from_millis(self.min_wait_ms.saturating_add(jitter))
    }

    /// Longest possible wait for any retry
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.min_wait_ms.saturating_add(self.max_jitter_ms))
    }
}

/// Run an operation, retrying transient failures.
///
/// The operation is called once per attempt. When the budget runs out the
/// last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, label: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = config.attempts();
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(request = label, attempt, "Request succeeded after retrying");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < attempts => {
                let delay = config.delay_for_attempt(attempt - 1);
                tracing::info!(
                    request = label,
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::warn!(
                        request = label,
                        attempts,
                        error = %e,
                        "Giving up after repeated transient failures"
                    );
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeedError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.min_wait_ms, 3_000);
        assert_eq!(config.jitter_base_ms, 1_000);
        assert_eq!(config.max_jitter_ms, 7_000);
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.max_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_retry_config_disabled() {
        assert_eq!(RetryConfig::disabled().attempts(), 1);
        let zero = RetryConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(zero.attempts(), 1);
    }

    #[test]
    fn test_jitter_ceiling_doubles_then_caps() {
        let config = RetryConfig::default();
        assert_eq!(config.jitter_ceiling(0), Duration::from_secs(1));
        assert_eq!(config.jitter_ceiling(1), Duration::from_secs(2));
        assert_eq!(config.jitter_ceiling(2), Duration::from_secs(4));
        assert_eq!(config.jitter_ceiling(3), Duration::from_secs(7));
        assert_eq!(config.jitter_ceiling(60), Duration::from_secs(7));
    }

    #[test]
    fn test_delay_stays_within_bounds() {
        let config = RetryConfig::default();
        for attempt in 0..12 {
            for _ in 0..50 {
                let delay = config.delay_for_attempt(attempt);
                assert!(delay >= Duration::from_secs(3));
                assert!(delay <= Duration::from_secs(3) + config.jitter_ceiling(attempt));
            }
        }
    }

    #[test]
    fn test_zero_config_has_no_delay() {
        let config = RetryConfig {
            min_wait_ms: 0,
            jitter_base_ms: 0,
            max_jitter_ms: 0,
            max_attempts: 3,
        };
        assert_eq!(config.delay_for_attempt(5), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_recovers_from_transient() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = with_retry(&RetryConfig::default(), "games", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(FeedError::Connection("refused".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_gives_up_with_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let config = RetryConfig {
            max_attempts: 4,
            ..Default::default()
        };

        let result: Result<()> = with_retry(&config, "games", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(FeedError::Connection("refused".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(FeedError::Connection(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_with_retry_does_not_retry_domain_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = with_retry(&RetryConfig::default(), "invite", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(FeedError::Api {
                    status: 404,
                    reason: "User not found".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(FeedError::Api { status: 404, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
