//! Coalescing cache: TTL staleness, true-LRU eviction, single-flight
//!
//! The one correctness property this layer exists for: a computation for a
//! key is installed in the in-flight map *before* its first suspension
//! point, so two callers racing past the staleness check share one upstream
//! fetch instead of issuing duplicates. The in-flight slot is cleared only
//! after the cached value is in place, so a caller arriving at any point
//! observes either the cache entry or the shared future, never a gap.

use crate::error::{AnalyticsError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tracing::{debug, trace};

type InflightFuture<T> = Shared<BoxFuture<'static, std::result::Result<T, AnalyticsError>>>;

/// One cached value with its staleness and recency timestamps.
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    inserted_at: Instant,
    last_accessed: Instant,
}

/// Hit/miss counters for observability.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub inflight: usize,
}

/// Keyed TTL+LRU cache with single-flight computation sharing.
pub struct CoalescingCache<T: Clone + Send + Sync + 'static> {
    name: &'static str,
    entries: DashMap<String, CacheEntry<T>>,
    inflight: DashMap<String, InflightFuture<T>>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Clone + Send + Sync + 'static> CoalescingCache<T> {
    pub fn new(name: &'static str, ttl: Duration, max_entries: usize) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            inflight: DashMap::new(),
            ttl,
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sweep_task: Mutex::new(None),
        }
    }

    /// Return the cached value for `key`, or run `compute` once and share
    /// its result with every concurrent caller of the same key.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.inserted_at.elapsed() < self.ttl {
                entry.last_accessed = Instant::now();
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(cache = self.name, key, "cache hit");
                return Ok(entry.value.clone());
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        // Install or join the shared computation. No await happens between
        // the staleness check above and this insertion; the entry lock makes
        // the check-then-install step atomic across threads.
        let (future, owner) = match self.inflight.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                trace!(cache = self.name, key, "joining in-flight computation");
                (occupied.get().clone(), false)
            }
            Entry::Vacant(vacant) => {
                let future = compute().boxed().shared();
                vacant.insert(future.clone());
                (future, true)
            }
        };

        let result = future.await;

        if owner {
            if let Ok(value) = &result {
                self.insert(key, value.clone());
            }
            // Cleared only after the value is cached: a racer that misses the
            // in-flight map from here on finds the fresh entry instead.
            self.inflight.remove(key);
        }

        result
    }

    /// Get without computing; refreshes recency on a fresh hit.
    pub fn get(&self, key: &str) -> Option<T> {
        let mut entry = self.entries.get_mut(key)?;
        if entry.inserted_at.elapsed() >= self.ttl {
            return None;
        }
        entry.last_accessed = Instant::now();
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.value.clone())
    }

    /// Insert a value, evicting the least-recently-accessed entry when the
    /// capacity bound is exceeded.
    pub fn insert(&self, key: &str, value: T) {
        let now = Instant::now();
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: now,
                last_accessed: now,
            },
        );

        while self.entries.len() > self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().last_accessed)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    debug!(cache = self.name, key, "LRU eviction");
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    /// Drop entries past their TTL regardless of access; idempotent.
    pub fn remove_expired(&self) {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(cache = self.name, removed, "sweep removed expired entries");
        }
    }

    /// Spawn the periodic expiry sweep. The task holds only a weak handle,
    /// so it can never keep the cache (or the process) alive on its own.
    pub fn start_sweep(self: &Arc<Self>, interval: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(cache) => cache.remove_expired(),
                    None => break,
                }
            }
        });
        let previous = self.sweep_task.lock().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Stop the background sweep. Idempotent; safe to call from tests and
    /// drop paths.
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweep_task.lock().take() {
            handle.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
            inflight: self.inflight.len(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for CoalescingCache<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn cache(ttl_secs: u64, max_entries: usize) -> CoalescingCache<u64> {
        CoalescingCache::new("test", Duration::from_secs(ttl_secs), max_entries)
    }

    #[tokio::test]
    async fn test_computes_once_then_hits() {
        let c = cache(60, 10);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            let value = c
                .get_or_compute("k", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = c.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_computation() {
        let c = Arc::new(cache(60, 10));
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let rx = rx.map(|_| ()).shared();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let c = c.clone();
            let calls = calls.clone();
            let gate = rx.clone();
            handles.push(tokio::spawn(async move {
                c.get_or_compute("k", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    // Hold every caller inside the computation until all
                    // eight tasks have had a chance to race the check.
                    gate.await;
                    Ok(42)
                })
                .await
                .unwrap()
            }));
        }

        // Let all tasks reach the await point, then release the gate.
        tokio::task::yield_now().await;
        tx.send(()).unwrap();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1, "exactly one upstream call");
        assert_eq!(c.stats().inflight, 0, "in-flight slot cleared");
    }

    #[tokio::test]
    async fn test_error_not_cached() {
        let c = cache(60, 10);
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_first = calls.clone();
        let result: Result<u64> = c
            .get_or_compute("k", move || async move {
                calls_first.fetch_add(1, Ordering::SeqCst);
                Err(AnalyticsError::upstream("boom"))
            })
            .await;
        assert!(result.is_err());
        assert!(!c.contains("k"));

        // Next call recomputes instead of replaying the failure.
        let calls_second = calls.clone();
        let value = c
            .get_or_compute("k", move || async move {
                calls_second.fetch_add(1, Ordering::SeqCst);
                Ok(9)
            })
            .await
            .unwrap();
        assert_eq!(value, 9);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_forces_recompute() {
        let c = cache(60, 10);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            c.get_or_compute("k", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await
            .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;

        let calls_after = calls.clone();
        c.get_or_compute("k", move || async move {
            calls_after.fetch_add(1, Ordering::SeqCst);
            Ok(2)
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_evicts_oldest_accessed_not_oldest_inserted() {
        let c = cache(600, 3);
        c.insert("a", 1);
        tokio::time::advance(Duration::from_secs(1)).await;
        c.insert("b", 2);
        tokio::time::advance(Duration::from_secs(1)).await;
        c.insert("c", 3);
        tokio::time::advance(Duration::from_secs(1)).await;

        // Touch "a": the oldest-inserted key becomes the freshest-accessed.
        assert_eq!(c.get("a"), Some(1));
        tokio::time::advance(Duration::from_secs(1)).await;

        c.insert("d", 4);
        assert!(c.contains("a"), "recently accessed key survives");
        assert!(!c.contains("b"), "stalest-accessed key evicted");
        assert!(c.contains("c"));
        assert!(c.contains("d"));
        assert_eq!(c.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep_removes_expired() {
        let c = Arc::new(cache(60, 10));
        c.insert("k", 1);
        c.start_sweep(Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;

        assert!(c.is_empty(), "sweep should have removed the expired entry");
        c.shutdown();
        // Shutdown twice is a no-op.
        c.shutdown();
    }
}
