//! Resilient read path used by every listing and lookup the console performs.
//!
//! A read goes: cache → rate limiter → retrying call → cache fill. A cache
//! hit skips both the limiter and the store. The limiter is fail-closed: if
//! the quota check itself errors, the read is refused.

pub mod cache;
pub mod rate_limit;
pub mod retry;

pub use cache::{CacheKey, ReadCache};
pub use rate_limit::{Quota, QuotaTable, RateDecision, RateLimiter, WindowRateLimiter};
pub use retry::{RetryPolicy, retry_with_backoff};

use crate::errors::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Who is reading what, for quota accounting and caching.
#[derive(Debug, Clone, Copy)]
pub struct ReadRequest<'a> {
    pub identity: &'a str,
    pub operation: &'a str,
    pub key: &'a CacheKey,
    pub cancel: &'a CancellationToken,
}

/// Wraps store reads with caching, per-user rate limiting and retries.
pub struct ResilientReader {
    limiter: Arc<dyn RateLimiter>,
    cache: ReadCache,
    policy: RetryPolicy,
}

impl std::fmt::Debug for ResilientReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientReader")
            .field("cache", &self.cache)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ResilientReader {
    #[must_use]
    pub fn new(limiter: Arc<dyn RateLimiter>, cache_ttl: Duration, policy: RetryPolicy) -> Self {
        Self {
            limiter,
            cache: ReadCache::new(cache_ttl),
            policy,
        }
    }

    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Drops cached reads after a write.
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }

    pub async fn read<T, F, Fut>(&self, request: ReadRequest<'_>, call: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let ReadRequest {
            identity,
            operation,
            key,
            cancel,
        } = request;

        if let Some(hit) = self.cache.get::<T>(key) {
            tracing::trace!(operation, key = key.as_str(), "Cache hit");
            return Ok(hit);
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled {
                operation: operation.to_string(),
            });
        }

        match self.limiter.check(identity, operation).await {
            Ok(RateDecision::Allowed) => {}
            Ok(RateDecision::Limited { retry_after }) => {
                tracing::warn!(identity, operation, ?retry_after, "Read quota exceeded");
                return Err(Error::RateLimitExceeded {
                    operation: operation.to_string(),
                    retry_after,
                });
            }
            Err(err) => {
                tracing::error!(identity, operation, error = %err, "Rate limit check failed, refusing read");
                return Err(Error::RateLimiterUnavailable {
                    operation: operation.to_string(),
                    message: err.to_string(),
                });
            }
        }

        let value = retry_with_backoff(operation, &self.policy, cancel, call).await?;
        self.cache.insert(key, value.clone());
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct BrokenLimiter;

    #[async_trait]
    impl RateLimiter for BrokenLimiter {
        async fn check(&self, _identity: &str, _operation: &str) -> Result<RateDecision> {
            Err(Error::Transient {
                message: "quota store unreachable".to_string(),
            })
        }
    }

    fn reader(max_requests: u32) -> ResilientReader {
        let quotas = QuotaTable::new(Quota::new(max_requests, Duration::from_secs(60)));
        ResilientReader::new(
            Arc::new(WindowRateLimiter::new(quotas)),
            Duration::from_secs(300),
            RetryPolicy::default(),
        )
    }

    async fn counted_read(
        reader: &ResilientReader,
        identity: &str,
        key: &CacheKey,
        calls: &AtomicU32,
    ) -> Result<u32> {
        let cancel = CancellationToken::new();
        reader
            .read(
                ReadRequest {
                    identity,
                    operation: "list_vouchers",
                    key,
                    cancel: &cancel,
                },
                || async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) },
            )
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_bypasses_store_and_limiter() -> Result<()> {
        let reader = reader(1);
        let calls = AtomicU32::new(0);
        let key = CacheKey::new("list_vouchers").param("page", 0);

        assert_eq!(counted_read(&reader, "alice", &key, &calls).await?, 1);
        // Quota of one is spent, yet the cached value is still served.
        assert_eq!(counted_read(&reader, "alice", &key, &calls).await?, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_fails_fast_without_calling_store() -> Result<()> {
        let reader = reader(1);
        let calls = AtomicU32::new(0);

        counted_read(&reader, "alice", &CacheKey::new("a"), &calls).await?;
        let result = counted_read(&reader, "alice", &CacheKey::new("b"), &calls).await;

        assert!(matches!(result, Err(Error::RateLimitExceeded { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_limiter_fails_closed() {
        let reader = ResilientReader::new(
            Arc::new(BrokenLimiter),
            Duration::from_secs(300),
            RetryPolicy::default(),
        );
        let calls = AtomicU32::new(0);

        let result = counted_read(&reader, "alice", &CacheKey::new("a"), &calls).await;

        assert!(matches!(result, Err(Error::RateLimiterUnavailable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_fresh_read() -> Result<()> {
        let reader = reader(10);
        let calls = AtomicU32::new(0);
        let key = CacheKey::new("list_vouchers");

        counted_read(&reader, "alice", &key, &calls).await?;
        reader.invalidate();
        assert_eq!(counted_read(&reader, "alice", &key, &calls).await?, 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reads_are_not_cached() {
        let reader = reader(10);
        let key = CacheKey::new("get_voucher");
        let cancel = CancellationToken::new();
        let request = ReadRequest {
            identity: "alice",
            operation: "get_voucher",
            key: &key,
            cancel: &cancel,
        };

        let first: Result<u32> = reader
            .read(request, || async {
                Err(Error::NotFound {
                    voucher_id: "v1".to_string(),
                })
            })
            .await;
        assert!(first.is_err());

        let second: Result<u32> = reader.read(request, || async { Ok(7) }).await;
        assert_eq!(second.unwrap(), 7);
    }
}
