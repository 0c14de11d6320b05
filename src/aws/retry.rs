//! Retry with exponential backoff for throttled upstream calls.
//!
//! The policy is an explicit value handed to the fetcher so retry behavior
//! is visible at the call site rather than buried in the SDK wrappers.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use tracing::debug;

use super::ApiError;

/// Retry policy for throttle-classified failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: usize,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub cap_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            cap_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> impl Iterator<Item = Duration> {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.cap_delay)
            .with_factor(2.0)
            .with_jitter()
            .with_max_times(self.max_attempts.saturating_sub(1))
            .build()
    }
}

/// Runs `op`, retrying only throttle errors, with exponential backoff and
/// jitter. Every other error returns immediately; an exhausted retry budget
/// returns the final throttle error for the caller to degrade.
pub async fn with_backoff<T, F, Fut>(policy: RetryPolicy, op: F) -> Result<T, ApiError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut delays = policy.backoff();
    let mut attempt = 1usize;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_throttle() => match delays.next() {
                Some(delay) => {
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "throttled, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(err),
            },
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            cap_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let result = with_backoff(fast_policy(3), || async { Ok::<_, ApiError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retries_throttle_until_success() {
        let calls = AtomicUsize::new(0);
        let result = with_backoff(fast_policy(5), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ApiError::Throttled {
                    message: "Rate exceeded".to_string(),
                })
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_budget_returns_throttle() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_backoff(fast_policy(3), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::Throttled {
                message: "Rate exceeded".to_string(),
            })
        })
        .await;

        assert!(result.unwrap_err().is_throttle());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_throttle_error_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_backoff(fast_policy(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::upstream("access denied"))
        })
        .await;

        assert!(!result.unwrap_err().is_throttle());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
