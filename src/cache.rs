//! Time-bounded snapshot cache for a service's group catalog.
//!
//! The catalog (every group's name and id) is the only thing ever cached;
//! per-user membership is always fetched fresh. A snapshot is replaced
//! wholesale rather than patched: group creation invalidates it, and the
//! adapter re-fetches the full catalog immediately afterwards so the new
//! group is visible on the very next lookup regardless of TTL.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Clock seam so tests can age the cache without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock backed [`Clock`] used outside tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct Snapshot<T> {
    value: T,
    fetched_at: Instant,
}

/// A single time-bounded snapshot, owned by the adapter instance that uses
/// it.
///
/// Concurrent readers share the snapshot through an `RwLock`; concurrent
/// refreshes may race, in which case the last writer wins. The guarantee is
/// eventual consistency within the TTL window, not linearizability.
pub struct SnapshotCache<T> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    inner: RwLock<Option<Snapshot<T>>>,
}

impl<T: Clone + Send + Sync> SnapshotCache<T> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            inner: RwLock::new(None),
        }
    }

    /// Return the cached value if a snapshot exists and is younger than the
    /// TTL.
    pub async fn get(&self) -> Option<T> {
        let guard = self.inner.read().await;
        match guard.as_ref() {
            Some(snapshot) => {
                let age = self.clock.now().saturating_duration_since(snapshot.fetched_at);
                if age < self.ttl {
                    Some(snapshot.value.clone())
                } else {
                    debug!("cache snapshot expired (age {:?})", age);
                    None
                }
            }
            None => None,
        }
    }

    /// Replace the snapshot with a freshly fetched value.
    pub async fn store(&self, value: T) {
        let mut guard = self.inner.write().await;
        // Drop the old snapshot before installing the new one; a reader that
        // raced the write lock sees either the full old or full new catalog.
        *guard = None;
        *guard = Some(Snapshot {
            value,
            fetched_at: self.clock.now(),
        });
    }

    /// Discard the snapshot so the next lookup refreshes.
    pub async fn clear(&self) {
        let mut guard = self.inner.write().await;
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Manually advanced clock for aging snapshots in tests.
    struct TestClock {
        now: Mutex<Instant>,
    }

    impl TestClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(Instant::now()),
            })
        }

        fn advance(&self, by: Duration) {
            let mut guard = self.now.lock().unwrap();
            *guard += by;
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }

    const TTL: Duration = Duration::from_secs(30 * 60);

    #[tokio::test]
    async fn empty_cache_misses() {
        let cache: SnapshotCache<Vec<i64>> = SnapshotCache::new(TTL, TestClock::new());
        assert_eq!(cache.get().await, None);
    }

    #[tokio::test]
    async fn fresh_snapshot_is_reused_within_ttl() {
        let clock = TestClock::new();
        let cache = SnapshotCache::new(TTL, clock.clone());
        cache.store(vec![1, 2, 3]).await;

        clock.advance(Duration::from_secs(29 * 60));
        assert_eq!(cache.get().await, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn snapshot_expires_after_ttl() {
        let clock = TestClock::new();
        let cache = SnapshotCache::new(TTL, clock.clone());
        cache.store(vec![1]).await;

        clock.advance(Duration::from_secs(31 * 60));
        assert_eq!(cache.get().await, None);
    }

    #[tokio::test]
    async fn clear_forces_miss_even_when_fresh() {
        let clock = TestClock::new();
        let cache = SnapshotCache::new(TTL, clock.clone());
        cache.store(vec![1]).await;
        cache.clear().await;
        assert_eq!(cache.get().await, None);
    }

    #[tokio::test]
    async fn store_replaces_rather_than_merges() {
        let clock = TestClock::new();
        let cache = SnapshotCache::new(TTL, clock.clone());
        cache.store(vec![1, 2]).await;
        cache.store(vec![3]).await;
        assert_eq!(cache.get().await, Some(vec![3]));
    }
}
