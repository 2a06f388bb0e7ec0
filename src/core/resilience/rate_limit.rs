//! Per-identity, per-operation read quotas.

use crate::errors::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// At most `max_requests` reads within any rolling `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub max_requests: u32,
    pub window: Duration,
}

impl Quota {
    #[must_use]
    pub const fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

/// Default quota plus per-operation overrides.
#[derive(Debug, Clone)]
pub struct QuotaTable {
    default: Quota,
    operations: HashMap<String, Quota>,
}

impl QuotaTable {
    #[must_use]
    pub fn new(default: Quota) -> Self {
        Self {
            default,
            operations: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>, quota: Quota) -> Self {
        self.operations.insert(operation.into(), quota);
        self
    }

    #[must_use]
    pub fn for_operation(&self, operation: &str) -> Quota {
        self.operations
            .get(operation)
            .copied()
            .unwrap_or(self.default)
    }

    /// Widest window across the default and every override.
    #[must_use]
    pub fn longest_window(&self) -> Duration {
        self.operations
            .values()
            .map(|quota| quota.window)
            .fold(self.default.window, Duration::max)
    }
}

/// Outcome of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after: Duration },
}

/// Quota check consulted before every uncached read.
///
/// An `Err` means the check itself could not be performed; callers treat
/// that as a refusal.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(&self, identity: &str, operation: &str) -> Result<RateDecision>;
}

/// In-process sliding-window limiter.
///
/// Each `(identity, operation)` pair keeps the instants of its recent reads.
/// Pruning, counting and recording happen under the map entry's lock, so
/// concurrent callers cannot both take the last slot. Once per longest window
/// a check also sweeps out pairs that have gone idle.
#[derive(Debug)]
pub struct WindowRateLimiter {
    quotas: QuotaTable,
    hits: DashMap<(String, String), VecDeque<Instant>>,
    started: Instant,
    /// Milliseconds after `started` of the last sweep
    last_sweep_ms: AtomicU64,
}

impl WindowRateLimiter {
    #[must_use]
    pub fn new(quotas: QuotaTable) -> Self {
        Self {
            quotas,
            hits: DashMap::new(),
            started: Instant::now(),
            last_sweep_ms: AtomicU64::new(0),
        }
    }

    /// Drops bookkeeping for pairs with no reads inside their window.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.hits.retain(|(_, operation), instants| {
            let window = self.quotas.for_operation(operation).window;
            instants
                .back()
                .is_some_and(|last| now.duration_since(*last) < window)
        });
    }

    #[must_use]
    pub fn tracked_pairs(&self) -> usize {
        self.hits.len()
    }

    /// Runs [`Self::cleanup`] if a full longest window has passed since the
    /// last sweep. Only the caller that wins the swap sweeps.
    fn sweep_if_due(&self, now: Instant) {
        let elapsed_ms = millis(now.duration_since(self.started));
        let last = self.last_sweep_ms.load(Ordering::Acquire);
        if elapsed_ms.saturating_sub(last) < millis(self.quotas.longest_window()) {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, elapsed_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.cleanup();
        }
    }

    fn check_now(&self, identity: &str, operation: &str) -> RateDecision {
        let quota = self.quotas.for_operation(operation);
        let limit = usize::try_from(quota.max_requests).unwrap_or(usize::MAX);
        let now = Instant::now();

        // Must run before the entry guard below is taken.
        self.sweep_if_due(now);

        let mut instants = self
            .hits
            .entry((identity.to_string(), operation.to_string()))
            .or_default();

        while instants
            .front()
            .is_some_and(|first| now.duration_since(*first) >= quota.window)
        {
            instants.pop_front();
        }

        if instants.len() >= limit {
            let retry_after = instants
                .front()
                .map_or(quota.window, |first| {
                    quota.window.saturating_sub(now.duration_since(*first))
                });
            return RateDecision::Limited { retry_after };
        }

        instants.push_back(now);
        RateDecision::Allowed
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl RateLimiter for WindowRateLimiter {
    async fn check(&self, identity: &str, operation: &str) -> Result<RateDecision> {
        Ok(self.check_now(identity, operation))
    }
}
