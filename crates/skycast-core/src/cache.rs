//! In-memory caching for upstream responses.
//!
//! Two eviction policies exist side by side:
//!
//! - [`TtlCache`] expires entries by age only.
//! - [`LruTtlCache`] additionally bounds the number of entries and evicts the
//!   least-recently-touched key first.
//!
//! Both are plain single-owner structures; [`CacheStore`] serializes access when a
//! cache is shared between concurrently running requests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Key/value cache contract shared by both eviction policies.
pub trait Cache<V> {
    /// Returns the value stored under `key` unless it is older than the TTL.
    /// Expired entries are removed as a side effect.
    fn get(&mut self, key: &str) -> Option<V>;

    /// Stores `value` under `key`, resetting its age.
    fn set(&mut self, key: String, value: V);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() > ttl
    }
}

/// Pure time-to-live cache.
#[derive(Debug)]
pub struct TtlCache<V> {
    map: HashMap<String, CacheEntry<V>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            map: HashMap::new(),
            ttl,
        }
    }

    pub const fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl<V: Clone> Cache<V> for TtlCache<V> {
    fn get(&mut self, key: &str) -> Option<V> {
        let entry = self.map.get(key)?;
        if entry.is_expired(self.ttl) {
            self.map.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    fn set(&mut self, key: String, value: V) {
        self.map.insert(key, CacheEntry::new(value));
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

/// Time-to-live cache bounded to `max_entries`, evicting by recency.
///
/// Every hit and every `set` moves the key to the most-recently-used position.
#[derive(Debug)]
pub struct LruTtlCache<V> {
    map: HashMap<String, CacheEntry<V>>,
    // Front is most recently used.
    order: VecDeque<String>,
    ttl: Duration,
    max_entries: usize,
}

impl<V: Clone> LruTtlCache<V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    pub const fn max_entries(&self) -> usize {
        self.max_entries
    }

    fn touch(&mut self, key: &str) {
        self.forget(key);
        self.order.push_front(key.to_owned());
    }

    fn forget(&mut self, key: &str) {
        if let Some(position) = self.order.iter().position(|candidate| candidate == key) {
            self.order.remove(position);
        }
    }
}

impl<V: Clone> Cache<V> for LruTtlCache<V> {
    fn get(&mut self, key: &str) -> Option<V> {
        let entry = self.map.get(key)?;
        if entry.is_expired(self.ttl) {
            self.map.remove(key);
            self.forget(key);
            return None;
        }

        let value = entry.value.clone();
        self.touch(key);
        Some(value)
    }

    fn set(&mut self, key: String, value: V) {
        self.touch(&key);
        self.map.insert(key, CacheEntry::new(value));

        while self.order.len() > self.max_entries {
            if let Some(evicted) = self.order.pop_back() {
                self.map.remove(&evicted);
            }
        }
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

/// Thread-safe wrapper serializing access to a single-owner cache.
///
/// The lock is never held across an await point.
#[derive(Debug)]
pub struct CacheStore<C> {
    inner: Mutex<C>,
}

impl<C> CacheStore<C> {
    pub fn new(cache: C) -> Self {
        Self {
            inner: Mutex::new(cache),
        }
    }

    pub fn get<V>(&self, key: &str) -> Option<V>
    where
        C: Cache<V>,
    {
        self.lock().get(key)
    }

    pub fn set<V>(&self, key: String, value: V)
    where
        C: Cache<V>,
    {
        self.lock().set(key, value);
    }

    pub fn len<V>(&self) -> usize
    where
        C: Cache<V>,
    {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, C> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ttl_cache_round_trips_before_expiry() {
        let mut cache = TtlCache::new(Duration::from_secs(1));

        assert!(cache.get("key1").is_none());

        cache.set("key1".to_string(), "value1".to_string());
        assert_eq!(cache.get("key1"), Some("value1".to_string()));

        cache.set("key1".to_string(), "value2".to_string());
        assert_eq!(cache.get("key1"), Some("value2".to_string()));
    }

    #[tokio::test]
    async fn ttl_cache_drops_expired_entries_on_get() {
        let mut cache = TtlCache::new(Duration::from_millis(100));

        cache.set("key1".to_string(), 1_u32);
        assert_eq!(cache.get("key1"), Some(1));

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(cache.get("key1").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn lru_cache_evicts_least_recently_touched_key() {
        let mut cache = LruTtlCache::new(Duration::from_secs(60), 2);

        cache.set("a".to_string(), 1_u32);
        cache.set("b".to_string(), 2_u32);
        // Touch `a` so `b` becomes the eviction candidate.
        assert_eq!(cache.get("a"), Some(1));
        cache.set("c".to_string(), 3_u32);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[tokio::test]
    async fn lru_cache_resetting_a_key_does_not_grow_the_store() {
        let mut cache = LruTtlCache::new(Duration::from_secs(60), 2);

        cache.set("a".to_string(), 1_u32);
        cache.set("a".to_string(), 2_u32);
        cache.set("b".to_string(), 3_u32);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(2));
    }

    #[tokio::test]
    async fn lru_cache_expires_by_age() {
        let mut cache = LruTtlCache::new(Duration::from_millis(100), 10);

        cache.set("a".to_string(), 1_u32);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn cache_store_shares_a_cache_across_tasks() {
        let store = std::sync::Arc::new(CacheStore::new(TtlCache::new(Duration::from_secs(60))));

        let writer = {
            let store = store.clone();
            tokio::spawn(async move { store.set("shared".to_string(), 42_u32) })
        };
        writer.await.expect("writer task should finish");

        assert_eq!(store.get::<u32>("shared"), Some(42));
        assert_eq!(store.len::<u32>(), 1);
    }
}
