// src/cache.rs
//! Short-lived cache of complete aggregation results.
//!
//! Entries expire whole after the TTL. Identical queries that arrive while one is
//! being computed wait on that key's lock and then read the stored result, so the
//! fan-out runs once per key per TTL window. Distinct keys never wait on each other.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use metrics::counter;
use tracing::debug;

use crate::aggregator::AggregateResult;

struct Entry {
    value: AggregateResult,
    inserted: Instant,
}

pub struct AggregateCache {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<String, Entry>>,
    key_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AggregateCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored result if present and fresh. Expired entries are removed on sight.
    pub fn get(&self, key: &str) -> Option<AggregateResult> {
        let mut map = self.lock_entries();
        match map.get(key) {
            Some(e) if e.inserted.elapsed() < self.ttl => Some(e.value.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store, purging expired entries first and then the oldest one if still full.
    pub fn insert(&self, key: String, value: AggregateResult) {
        let mut map = self.lock_entries();
        let ttl = self.ttl;
        map.retain(|_, e| e.inserted.elapsed() < ttl);
        if map.len() >= self.max_entries && !map.contains_key(&key) {
            let oldest = map
                .iter()
                .min_by_key(|(_, e)| e.inserted)
                .map(|(k, _)| k.clone());
            if let Some(k) = oldest {
                debug!(target: "aggregate", key = %k, "evicting oldest cached result");
                map.remove(&k);
            }
        }
        map.insert(
            key,
            Entry {
                value,
                inserted: Instant::now(),
            },
        );
    }

    /// Cached value on hit (`true`), otherwise compute, store and return (`false`).
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> (AggregateResult, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AggregateResult>,
    {
        if let Some(hit) = self.get(key) {
            counter!("aggregate_cache_hits_total").increment(1);
            return (hit, true);
        }

        let release = KeyLockRelease {
            cache: self,
            key,
            lock: self.key_lock(key),
        };
        let _held = Arc::clone(&release.lock).lock_owned().await;
        if let Some(hit) = self.get(key) {
            counter!("aggregate_cache_hits_total").increment(1);
            return (hit, true);
        }
        counter!("aggregate_cache_misses_total").increment(1);
        let value = compute().await;
        self.insert(key.to_string(), value.clone());
        (value, false)
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.lock_key_locks();
        locks.entry(key.to_string()).or_default().clone()
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_key_locks(&self) -> MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
        self.key_locks.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Drops the per-key lock from the map once its last user is gone, including
/// callers whose future was dropped mid-compute.
struct KeyLockRelease<'a> {
    cache: &'a AggregateCache,
    key: &'a str,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for KeyLockRelease<'_> {
    fn drop(&mut self) {
        let mut locks = self.cache.lock_key_locks();
        // Map + ours: nobody else holds or waits on it.
        if Arc::strong_count(&self.lock) <= 2 {
            locks.remove(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn result(n: usize) -> AggregateResult {
        let mut r = AggregateResult::empty();
        r.per_source_stats.insert(format!("s{n}"), Default::default());
        r
    }

    #[tokio::test]
    async fn second_identical_call_is_a_hit_and_returns_the_same_value() {
        let cache = AggregateCache::new(Duration::from_secs(60), 8);
        let calls = AtomicUsize::new(0);
        let (a, hit_a) = cache
            .get_or_compute("k", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                result(1)
            })
            .await;
        let (b, hit_b) = cache
            .get_or_compute("k", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                result(2)
            })
            .await;
        assert!(!hit_a);
        assert!(hit_b);
        assert_eq!(a.generated_at, b.generated_at);
        assert!(b.per_source_stats.contains_key("s1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = AggregateCache::new(Duration::from_millis(40), 8);
        cache.insert("k".into(), result(1));
        assert!(cache.get("k").is_some());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn oldest_entry_is_evicted_when_full() {
        let cache = AggregateCache::new(Duration::from_secs(60), 2);
        cache.insert("a".into(), result(1));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("b".into(), result(2));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("c".into(), result(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[tokio::test]
    async fn concurrent_identical_queries_compute_once() {
        let cache = Arc::new(AggregateCache::new(Duration::from_secs(60), 8));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("same", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        result(1)
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abandoned_compute_does_not_leak_its_key_lock() {
        let cache = AggregateCache::new(Duration::from_secs(60), 8);
        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            cache.get_or_compute("slow", || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                result(1)
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(cache.lock_key_locks().is_empty());
        assert!(cache.is_empty());

        let (_, hit) = cache.get_or_compute("slow", || async { result(2) }).await;
        assert!(!hit);
        assert!(cache.lock_key_locks().is_empty());
    }
}
