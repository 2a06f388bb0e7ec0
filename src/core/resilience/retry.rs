//! Exponential backoff for transient read failures.

use crate::errors::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How many times a transient failure is retried, and how long to wait.
///
/// `delay = min(base_delay * 2^retry, max_delay)`, where `retry` counts from zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (zero-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        2_u32
            .checked_pow(retry)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Runs `call` until it succeeds, fails permanently, or the retries run out.
///
/// Only [`Error::is_transient`] failures are retried; exhaustion surfaces as
/// [`Error::Unavailable`]. Cancellation is honored while an attempt is in
/// flight and during backoff, and never consumes a retry.
pub async fn retry_with_backoff<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let cancelled = || Error::Cancelled {
        operation: operation.to_string(),
    };
    let mut retries: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(cancelled()),
            outcome = call() => outcome,
        };

        match outcome {
            Ok(value) => {
                if retries > 0 {
                    tracing::info!(operation, retries, "Read succeeded after retrying");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() => {
                if retries >= policy.max_retries {
                    tracing::error!(operation, attempts = retries + 1, error = %err, "Retries exhausted");
                    return Err(Error::Unavailable {
                        attempts: retries + 1,
                        message: err.to_string(),
                    });
                }

                let delay = policy.delay_for(retries);
                tracing::warn!(
                    operation,
                    attempt = retries + 1,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Transient failure, backing off"
                );

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(cancelled()),
                    () = tokio::time::sleep(delay) => {}
                }
                retries += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn transient() -> Error {
        Error::Transient {
            message: "connection reset".to_string(),
        }
    }

    /// Fails transiently `failures` times, then returns the attempt count.
    fn flaky(failures: u32, calls: &Arc<AtomicU32>) -> impl FnMut() -> std::future::Ready<Result<u32>> {
        let calls = Arc::clone(calls);
        move || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(if attempt <= failures {
                Err(transient())
            } else {
                Ok(attempt)
            })
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(16));
        assert_eq!(policy.delay_for(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for(40), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_transient_failures_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result = retry_with_backoff(
            "list_vouchers",
            &RetryPolicy::default(),
            &CancellationToken::new(),
            flaky(2, &calls),
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1000ms + 2000ms of backoff
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_four_failures_exhaust_three_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result = retry_with_backoff(
            "list_vouchers",
            &RetryPolicy::default(),
            &CancellationToken::new(),
            flaky(4, &calls),
        )
        .await;

        assert!(matches!(result, Err(Error::Unavailable { attempts: 4, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 1000ms + 2000ms + 4000ms of backoff
        assert_eq!(started.elapsed(), Duration::from_millis(7000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<()> = retry_with_backoff(
            "get_voucher",
            &RetryPolicy::default(),
            &CancellationToken::new(),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Err(Error::NotFound {
                    voucher_id: "v1".to_string(),
                }))
            },
        )
        .await;

        assert!(matches!(result, Err(Error::NotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff_stops_retrying() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let result = retry_with_backoff(
            "list_vouchers",
            &RetryPolicy::default(),
            &cancel,
            flaky(10, &calls),
        )
        .await;

        assert!(matches!(result, Err(Error::Cancelled { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_token_skips_the_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = retry_with_backoff(
            "list_vouchers",
            &RetryPolicy::default(),
            &cancel,
            flaky(0, &calls),
        )
        .await;

        assert!(matches!(result, Err(Error::Cancelled { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
