//! Expiring Cache - generic TTL + LRU key/value store
//!
//! Memoizes expensive intermediate computations on the polling path. Entries
//! die in one of three ways: evicted under capacity pressure (strict LRU,
//! reads and writes both refresh recency), expired past their TTL, or
//! explicitly invalidated. A periodic sweep (`cleanup_expired`) bounds memory
//! even when nothing reads the cache.
//!
//! All operations take the lock once, so a single `get`/`put` is atomic with
//! respect to concurrent callers and the hit/miss/eviction counters can never
//! drift from the map contents.

use chrono::Utc;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use tracing::debug;

/// Cache configuration per instance
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entry-count capacity
    pub max_size: usize,
    /// Time-to-live in seconds
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 256,
            ttl_seconds: 300,
        }
    }
}

/// Counters exposed on the operator surface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
}

struct CacheEntry<V> {
    value: V,
    created_at_ms: i64,
    expires_at_ms: i64,
    /// Monotonic recency stamp; the minimum is the LRU victim
    touched: u64,
}

struct CacheInner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Generic TTL + LRU cache
pub struct ExpiringCache<K, V> {
    config: CacheConfig,
    inner: Mutex<CacheInner<K, V>>,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                clock: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    /// Look up a key. Absent or expired entries are misses; an expired entry
    /// is removed on the spot. A hit refreshes recency.
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Utc::now().timestamp_millis())
    }

    /// Insert or overwrite a value. Writing to an existing key counts as an
    /// access; inserting at capacity evicts the least-recently-used entry.
    pub fn put(&self, key: K, value: V) {
        self.put_at(key, value, Utc::now().timestamp_millis())
    }

    /// Remove a key explicitly. Not counted as an eviction.
    pub fn invalidate(&self, key: &K) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.entries.remove(key);
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("cache lock poisoned");
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            size: inner.entries.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Proactively drop expired entries, independent of access. Run on a
    /// schedule by the job wrapper. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Utc::now().timestamp_millis())
    }

    // ── Clock-injected variants (timestamps in milliseconds) ──

    pub(crate) fn get_at(&self, key: &K, now_ms: i64) -> Option<V> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");

        let expired = match inner.entries.get(key) {
            Some(entry) => now_ms >= entry.expires_at_ms,
            None => {
                inner.misses += 1;
                return None;
            }
        };

        if expired {
            if let Some(entry) = inner.entries.remove(key) {
                debug!(age_ms = now_ms - entry.created_at_ms, "expired entry dropped on read");
            }
            inner.misses += 1;
            return None;
        }

        inner.clock += 1;
        let stamp = inner.clock;
        let entry = inner.entries.get_mut(key).expect("presence checked above");
        entry.touched = stamp;
        let value = entry.value.clone();
        inner.hits += 1;
        Some(value)
    }

    pub(crate) fn put_at(&self, key: K, value: V, now_ms: i64) {
        let ttl_ms = self.config.ttl_seconds as i64 * 1000;
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.clock += 1;
        let stamp = inner.clock;

        let is_insert = !inner.entries.contains_key(&key);
        if is_insert && inner.entries.len() >= self.config.max_size {
            // Evict the entry with the oldest recency stamp
            if let Some(victim) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.touched)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&victim);
                inner.evictions += 1;
            }
        }

        inner.entries.insert(
            key,
            CacheEntry {
                value,
                created_at_ms: now_ms,
                expires_at_ms: now_ms + ttl_ms,
                touched: stamp,
            },
        );
    }

    pub(crate) fn cleanup_expired_at(&self, now_ms: i64) -> usize {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let before = inner.entries.len();
        inner.entries.retain(|_, e| now_ms < e.expires_at_ms);
        let removed = before - inner.entries.len();
        if removed > 0 {
            debug!(removed, remaining = inner.entries.len(), "cache sweep removed expired entries");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_size: usize, ttl_seconds: u64) -> ExpiringCache<String, i32> {
        ExpiringCache::new(CacheConfig {
            max_size,
            ttl_seconds,
        })
    }

    #[test]
    fn test_get_put_roundtrip() {
        let c = cache(4, 60);
        c.put("a".into(), 1);
        assert_eq!(c.get(&"a".into()), Some(1));
        assert_eq!(c.get(&"b".into()), None);

        let stats = c.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let c = cache(3, 60);
        c.put_at("a".into(), 1, 0);
        c.put_at("b".into(), 2, 1);
        c.put_at("c".into(), 3, 2);

        // Read "a" so "b" becomes the LRU victim
        assert_eq!(c.get_at(&"a".into(), 3), Some(1));
        c.put_at("d".into(), 4, 4);

        assert_eq!(c.get_at(&"b".into(), 5), None);
        assert_eq!(c.get_at(&"a".into(), 5), Some(1));
        assert_eq!(c.get_at(&"c".into(), 5), Some(3));
        assert_eq!(c.get_at(&"d".into(), 5), Some(4));
        assert_eq!(c.stats().evictions, 1);
    }

    #[test]
    fn test_write_to_existing_key_refreshes_recency() {
        let c = cache(2, 60);
        c.put_at("a".into(), 1, 0);
        c.put_at("b".into(), 2, 1);
        // Overwrite "a" - now "b" is least recently used
        c.put_at("a".into(), 10, 2);
        c.put_at("c".into(), 3, 3);

        assert_eq!(c.get_at(&"b".into(), 4), None);
        assert_eq!(c.get_at(&"a".into(), 4), Some(10));
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let c = cache(2, 60);
        c.put_at("a".into(), 1, 0);
        c.put_at("b".into(), 2, 1);
        c.put_at("a".into(), 3, 2);
        assert_eq!(c.len(), 2);
        assert_eq!(c.stats().evictions, 0);
    }

    #[test]
    fn test_ttl_expiry_is_a_miss_regardless_of_pressure() {
        let c = cache(100, 10);
        c.put_at("a".into(), 1, 0);

        // Just before the boundary: hit
        assert_eq!(c.get_at(&"a".into(), 9_999), Some(1));
        // At the boundary: miss, entry removed
        assert_eq!(c.get_at(&"a".into(), 10_000), None);
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn test_cleanup_sweep_removes_expired_without_access() {
        let c = cache(100, 10);
        c.put_at("a".into(), 1, 0);
        c.put_at("b".into(), 2, 5_000);

        let removed = c.cleanup_expired_at(12_000);
        assert_eq!(removed, 1);
        assert_eq!(c.len(), 1);
        assert_eq!(c.get_at(&"b".into(), 12_000), Some(2));
    }

    #[test]
    fn test_invalidate_is_not_an_eviction() {
        let c = cache(4, 60);
        c.put("a".into(), 1);
        c.invalidate(&"a".into());
        assert_eq!(c.get(&"a".into()), None);
        assert_eq!(c.stats().evictions, 0);
    }
}
