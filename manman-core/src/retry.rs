//! Bounded retry with exponential backoff and jitter.
//!
//! Every external connection (database pool, broker, container engine,
//! object store) goes through the same envelope: a bounded number of
//! attempts, doubling delay, and a small deterministic jitter derived from
//! the attempt counter so that a fleet of hosts does not thunder in step.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Retry policy for [`with_backoff`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts beyond the first; 0 disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry; doubles per attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Delay before retry `attempt` (1-indexed), capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1));
        let raw = self.base_delay.saturating_mul(multiplier);
        // Deterministic jitter: spread attempts by up to 1/8 of the delay.
        let jitter = raw / 8 * (attempt % 2);
        std::cmp::min(raw + jitter, self.max_delay)
    }
}

/// Run `op` until it succeeds, the error is non-retriable, or the policy is
/// exhausted.
pub async fn with_backoff<T, F, Fut>(label: &str, policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(target: "manman::retry", %label, attempts = attempt + 1, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retriable() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    target: "manman::retry",
                    %label,
                    attempt,
                    error = %err,
                    "attempt failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                if attempt >= policy.max_retries && err.is_retriable() {
                    tracing::error!(target: "manman::retry", %label, attempts = attempt + 1, error = %err, "retries exhausted");
                    return Err(Error::permanent(format!(
                        "{label} failed after {} attempts: {err}",
                        attempt + 1
                    )));
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn delays_double_and_cap() {
        let policy = RetryPolicy::new(6, Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1125));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert!(policy.delay_for(6) <= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let result = with_backoff("test", RetryPolicy::new(3, Duration::from_millis(10)), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::transient("flaky"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_short_circuit() {
        let calls = AtomicU32::new(0);
        let result: Result<()> =
            with_backoff("test", RetryPolicy::default(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::permanent("no such image")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_become_permanent() {
        let result: Result<()> =
            with_backoff("test", RetryPolicy::new(2, Duration::from_millis(1)), || async {
                Err(Error::transient("still down"))
            })
            .await;
        let err = result.unwrap_err();
        assert!(err.is_permanent());
    }
}
