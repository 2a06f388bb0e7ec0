//! Short-lived cache of successful reads.

use dashmap::DashMap;
use std::any::Any;
use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Builds a cache key from an operation name and every parameter that shapes
/// the result (filters and pagination included).
#[derive(Debug, Clone)]
pub struct CacheKey(String);

impl CacheKey {
    #[must_use]
    pub fn new(operation: &str) -> Self {
        Self(operation.to_string())
    }

    #[must_use]
    pub fn param(mut self, name: &str, value: impl Display) -> Self {
        self.0.push_str(&format!("|{name}={value}"));
        self
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

struct CachedRead {
    stored_at: Instant,
    value: Arc<dyn Any + Send + Sync>,
}

/// Type-erased read cache with a fixed staleness window.
///
/// Expired entries are dropped when read, and swept in bulk by the first
/// insert after each full TTL.
pub struct ReadCache {
    ttl: Duration,
    entries: DashMap<String, CachedRead>,
    started: Instant,
    last_purge_ms: AtomicU64,
}

impl std::fmt::Debug for ReadCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl ReadCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
            started: Instant::now(),
            last_purge_ms: AtomicU64::new(0),
        }
    }

    /// Returns a fresh value stored under `key`; expired entries are evicted.
    #[must_use]
    pub fn get<T>(&self, key: &CacheKey) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let (fresh, value) = match self.entries.get(key.as_str()) {
            Some(entry) => (
                entry.stored_at.elapsed() < self.ttl,
                entry.value.downcast_ref::<T>().cloned(),
            ),
            None => return None,
        };

        if fresh {
            return value;
        }
        self.entries
            .remove_if(key.as_str(), |_, entry| entry.stored_at.elapsed() >= self.ttl);
        None
    }

    pub fn insert<T>(&self, key: &CacheKey, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.purge_if_due();
        self.entries.insert(
            key.as_str().to_string(),
            CachedRead {
                stored_at: Instant::now(),
                value: Arc::new(value),
            },
        );
    }

    /// Drops every entry older than the TTL.
    pub fn purge_expired(&self) {
        self.entries
            .retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
    }

    fn purge_if_due(&self) {
        let elapsed_ms = millis(self.started.elapsed());
        let last = self.last_purge_ms.load(Ordering::Acquire);
        if elapsed_ms.saturating_sub(last) < millis(self.ttl) {
            return;
        }
        if self
            .last_purge_ms
            .compare_exchange(last, elapsed_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.purge_expired();
        }
    }

    /// Forgets everything; called after writes so readers see them at once.
    pub fn invalidate_all(&self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
