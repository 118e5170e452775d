//! Bounded exponential-backoff retry
//!
//! One policy object, independent of what resource is being retried. The
//! base delay doubles per attempt (configurable multiplier), is capped, and
//! carries a small jitter so parallel workers do not retry in lockstep.
//! Exhaustion returns the last error; callers count it and abandon the item,
//! never retry indefinitely.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::warn;

/// Retry policy knobs. Serializable so it lives in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the given 1-based failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = (self.base_delay_ms as f64
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32))
            as u64;
        let capped = exponential.min(self.max_delay_ms);
        let jitter = if self.jitter_ms > 0 {
            fastrand::u64(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(capped + jitter)
    }

    /// A policy with no waiting, for tests.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
            jitter_ms: 0,
        }
    }
}

/// Run `operation` up to `policy.max_attempts` times with backoff between
/// failures. Returns the last error on exhaustion.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    with_retry_if(policy, op_name, operation, |_| true).await
}

/// Like [`with_retry`], but gives up on the first error `retryable`
/// rejects; an authentication failure never heals by waiting.
pub async fn with_retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    op_name: &str,
    mut operation: F,
    retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut last_error = None;

    for attempt in 1..=policy.max_attempts.max(1) {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !retryable(&e) {
                    warn!("{} failed with a non-retryable error: {}", op_name, e);
                    return Err(e);
                }
                if attempt < policy.max_attempts {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        op_name, attempt, policy.max_attempts, delay, e
                    );
                    last_error = Some(e);
                    sleep(delay).await;
                } else {
                    warn!(
                        "{} failed on final attempt {}/{}: {}",
                        op_name, attempt, policy.max_attempts, e
                    );
                    last_error = Some(e);
                }
            }
        }
    }

    Err(last_error.expect("at least one attempt ran"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 3_000,
            backoff_multiplier: 2.0,
            jitter_ms: 0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(3_000), "capped");
        assert_eq!(policy.delay_for(4), Duration::from_millis(3_000));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, String> =
            with_retry(&RetryPolicy::immediate(3), "flaky", || async {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(format!("transient {n}"))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error_after_max_attempts() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), String> =
            with_retry(&RetryPolicy::immediate(3), "doomed", || async {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                Err(format!("failure {n}"))
            })
            .await;

        assert_eq!(result.unwrap_err(), "failure 3");
        assert_eq!(attempts.load(Ordering::SeqCst), 3, "never retried past max");
    }

    #[tokio::test]
    async fn non_retryable_error_stops_after_one_attempt() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), String> = with_retry_if(
            &RetryPolicy::immediate(5),
            "locked out",
            || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err("credentials rejected".to_string())
            },
            |e: &String| !e.contains("credentials"),
        )
        .await;

        assert_eq!(result.unwrap_err(), "credentials rejected");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn first_success_never_sleeps() {
        let result: Result<&str, &str> = with_retry(
            &RetryPolicy::default(),
            "instant",
            || async { Ok("done") },
        )
        .await;
        assert_eq!(result.unwrap(), "done");
    }
}
