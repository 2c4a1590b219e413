//! Retry with exponential backoff for stream fetches.
//!
//! Backoff doubles from the base per attempt with a hard cap, optional jitter
//! below the cap, and cancellation observed between sleeps.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::FetchError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, counting the initial one.
    pub max_attempts: u32,
    /// Base delay; the delay after attempt `n` is `base * 2^n` (capped).
    pub base_delay: Duration,
    /// Hard cap on the computed delay.
    pub max_delay: Duration,
    /// Adds random jitter of `[0, base/2)` below the cap when true.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Compute the sleep after a failed attempt (0-indexed).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Checked shift so misconfigured attempt counts saturate instead of
        // overflowing the Duration math.
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let exp_delay = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay);
        let capped = exp_delay.min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        let jitter_range_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        let remaining_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let jitter_limit_ms = jitter_range_ms.min(remaining_ms);
        if jitter_limit_ms == 0 {
            return capped;
        }

        let jitter_ms = rand::rng().random_range(0..jitter_limit_ms);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}

/// Result of a single attempt, as judged by the operation itself.
pub enum RetryAction<T> {
    Success(T),
    /// Failed with a transient cause; try again if attempts remain.
    Retry(FetchError),
    /// Failed permanently; no further attempts.
    Fail(FetchError),
}

/// Why the retry loop gave up.
#[derive(Debug)]
pub enum RetryOutcome {
    Cancelled,
    /// Every allowed attempt failed with a transient cause.
    Exhausted { attempts: u32, last: FetchError },
    /// A non-retryable failure ended the loop early.
    Fatal { attempts: u32, error: FetchError },
}

/// Drive `operation` through up to `max_attempts` attempts.
///
/// The closure receives the 0-indexed attempt number. Cancellation is
/// observed before each attempt and during backoff sleeps, never mid-attempt.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    operation: F,
) -> Result<T, RetryOutcome>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = RetryAction<T>>,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 0..max_attempts {
        if token.is_cancelled() {
            return Err(RetryOutcome::Cancelled);
        }

        match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(error) => {
                return Err(RetryOutcome::Fatal {
                    attempts: attempt + 1,
                    error,
                });
            }
            RetryAction::Retry(error) => {
                if attempt + 1 >= max_attempts {
                    return Err(RetryOutcome::Exhausted {
                        attempts: attempt + 1,
                        last: error,
                    });
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    max = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying after transient failure"
                );
                tokio::select! {
                    _ = token.cancelled() => return Err(RetryOutcome::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    // The loop always returns from its last iteration.
    Err(RetryOutcome::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            jitter: false,
        }
    }

    fn transient() -> FetchError {
        FetchError::http_status(StatusCode::BAD_GATEWAY, "https://cdn.example.com/seg")
    }

    #[test]
    fn delay_doubles_and_respects_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: false,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        // 100ms * 2^10 = 102.4s, capped.
        assert!(policy.delay_for_attempt(10) <= Duration::from_secs(10));
    }

    #[test]
    fn jitter_never_exceeds_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(1),
            jitter: true,
        };
        for _ in 0..32 {
            assert!(policy.delay_for_attempt(10) <= Duration::from_secs(1));
        }
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let token = CancellationToken::new();
        let result =
            retry_with_backoff(&fast_policy(3), &token, |_| async { RetryAction::Success(7) })
                .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn exhausts_exactly_at_the_attempt_cap() {
        let token = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&fast_policy(5), &token, |_| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async { RetryAction::Retry(transient()) }
        })
        .await;

        assert_eq!(attempts.load(Ordering::Relaxed), 5);
        match result.unwrap_err() {
            RetryOutcome::Exhausted { attempts, .. } => assert_eq!(attempts, 5),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn late_success_stops_further_attempts() {
        let token = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        // Succeed on the 4th attempt of a 5-attempt policy.
        let result = retry_with_backoff(&fast_policy(5), &token, |attempt| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async move {
                if attempt < 3 {
                    RetryAction::Retry(transient())
                } else {
                    RetryAction::Success(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn fatal_failure_short_circuits() {
        let token = CancellationToken::new();
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&fast_policy(5), &token, |_| {
            attempts.fetch_add(1, Ordering::Relaxed);
            async {
                RetryAction::Fail(FetchError::http_status(StatusCode::NOT_FOUND, "u"))
            }
        })
        .await;

        assert_eq!(attempts.load(Ordering::Relaxed), 1);
        assert!(matches!(
            result.unwrap_err(),
            RetryOutcome::Fatal { attempts: 1, .. }
        ));
    }

    #[tokio::test]
    async fn cancellation_is_observed_before_the_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<(), _> =
            retry_with_backoff(&fast_policy(5), &token, |_| async { RetryAction::Success(()) })
                .await;
        assert!(matches!(result.unwrap_err(), RetryOutcome::Cancelled));
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_backoff_sleep() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            jitter: false,
        };
        let token = CancellationToken::new();
        let inner = token.clone();
        let result: Result<(), _> = retry_with_backoff(&policy, &token, move |_| {
            inner.cancel();
            async { RetryAction::Retry(transient()) }
        })
        .await;
        assert!(matches!(result.unwrap_err(), RetryOutcome::Cancelled));
    }
}
