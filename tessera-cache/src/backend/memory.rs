//! Bounded in-process cache backend.
//!
//! Entries live in an [`LruCache`] guarded by a single mutex. Both reads and
//! writes refresh recency, so eviction is strict least-recently-accessed.
//! TTL expiry is lazy: an expired entry stays resident until the next access
//! to its key (or until it reaches the LRU end and is evicted).
//!
//! # Thread Safety
//!
//! The mutex is held only for the map mutation itself; counters are atomics
//! updated outside the critical section.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use tessera_core::{CacheError, ConfigError, TesseraError, TesseraResult};
use tracing::debug;

use super::traits::{effective_ttl, CacheBackend, CacheResult, CacheStats, CacheValue};

/// A cached value with its lifetime bounds.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: CacheValue,
    pub created_at: Instant,
    /// Always later than `created_at` when set.
    pub expires_at: Option<Instant>,
}

impl CacheEntry {
    /// Create an entry stamped now.
    ///
    /// A TTL too large to represent as an `Instant` never expires.
    pub fn new(value: CacheValue, ttl: Option<Duration>) -> Self {
        let created_at = Instant::now();
        Self {
            value,
            created_at,
            expires_at: effective_ttl(ttl).and_then(|ttl| created_at.checked_add(ttl)),
        }
    }

    /// An entry is expired once `now` reaches `expires_at`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// In-process cache with LRU eviction and lazy TTL expiry.
///
/// Independent instances share nothing: invalidating one never affects
/// another.
///
/// # Example
///
/// ```ignore
/// let backend = InMemoryBackend::new(1000)?;
/// backend.set("user:1", json!({"name": "ada"}), None).await?;
/// assert!(backend.exists("user:1").await?);
/// ```
pub struct InMemoryBackend {
    entries: Mutex<LruCache<String, CacheEntry>>,
    capacity: NonZeroUsize,
    counters: Counters,
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

impl InMemoryBackend {
    /// Create a backend holding at most `capacity` entries.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if `capacity` is zero.
    pub fn new(capacity: usize) -> TesseraResult<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            TesseraError::Config(ConfigError::InvalidValue {
                field: "capacity".to_string(),
                value: capacity.to_string(),
                reason: "must be greater than 0".to_string(),
            })
        })?;

        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity,
            counters: Counters::default(),
        })
    }

    /// Configured entry bound.
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Number of resident entries, expired-but-uncollected ones included.
    pub fn len(&self) -> usize {
        self.lock_entries().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys from least to most recently used.
    pub fn keys_by_recency(&self) -> Vec<String> {
        self.lock_entries()
            .map(|entries| entries.iter().rev().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default()
    }

    fn lock_entries(&self) -> CacheResult<MutexGuard<'_, LruCache<String, CacheEntry>>> {
        self.entries
            .lock()
            .map_err(|_| CacheError::poisoned("in-process cache entries"))
    }

    fn record_miss(&self) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<CacheValue>> {
        let now = Instant::now();
        let (value, expired) = {
            let mut entries = self.lock_entries()?;
            match entries.peek(key).map(|entry| entry.is_expired_at(now)) {
                None => (None, false),
                Some(true) => {
                    entries.pop(key);
                    (None, true)
                }
                // `get` promotes the key to the MRU end.
                Some(false) => (entries.get(key).map(|entry| entry.value.clone()), false),
            }
        };

        if expired {
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
            debug!(key, "expired entry removed on read");
        }
        match value {
            Some(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            None => {
                self.record_miss();
                Ok(None)
            }
        }
    }

    async fn set(
        &self,
        key: &str,
        value: CacheValue,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let entry = CacheEntry::new(value, ttl);
        // `push` replaces in place for an existing key and otherwise evicts
        // the LRU entry when full; either way the key ends up MRU.
        let displaced = self.lock_entries()?.push(key.to_string(), entry);

        if let Some((evicted_key, _)) = displaced {
            if evicted_key != key {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(evicted = %evicted_key, inserted = key, "evicted least recently used entry");
            }
        }
        Ok(true)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        let removed = self.lock_entries()?.pop(key);
        Ok(removed.is_some_and(|entry| !entry.is_expired_at(now)))
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        let mut entries = self.lock_entries()?;
        match entries.peek(key).map(|entry| entry.is_expired_at(now)) {
            None => Ok(false),
            Some(true) => {
                entries.pop(key);
                drop(entries);
                self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                Ok(false)
            }
            Some(false) => Ok(true),
        }
    }

    async fn clear(&self) -> CacheResult<bool> {
        self.lock_entries()?.clear();
        Ok(true)
    }

    async fn clear_pattern(&self, substring: &str) -> CacheResult<u64> {
        let mut entries = self.lock_entries()?;
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.contains(substring))
            .map(|(key, _)| key.clone())
            .collect();

        let mut removed = 0u64;
        for key in &doomed {
            if entries.pop(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn ping(&self) -> CacheResult<()> {
        self.lock_entries().map(|_| ())
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        Ok(CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            entry_count: self.lock_entries()?.len() as u64,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend(capacity: usize) -> InMemoryBackend {
        InMemoryBackend::new(capacity).expect("capacity is non-zero")
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            InMemoryBackend::new(0),
            Err(TesseraError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_entry_expiry_bounds() {
        let entry = CacheEntry::new(json!(1), Some(Duration::from_secs(10)));
        let deadline = entry.expires_at.expect("ttl set");
        assert!(deadline > entry.created_at);
        assert!(!entry.is_expired_at(entry.created_at));
        assert!(entry.is_expired_at(deadline));

        let forever = CacheEntry::new(json!(1), Some(Duration::ZERO));
        assert!(forever.expires_at.is_none());
    }

    #[test]
    fn test_unrepresentable_ttl_never_expires() {
        let entry = CacheEntry::new(json!(1), Some(Duration::from_secs(u64::MAX)));
        assert!(entry.expires_at.is_none());
        assert!(!entry.is_expired_at(Instant::now()));
    }

    #[tokio::test]
    async fn test_set_with_huge_ttl_is_stored() {
        let backend = backend(2);
        assert!(backend
            .set("k", json!(1), Some(Duration::from_secs(u64::MAX)))
            .await
            .unwrap());
        assert_eq!(backend.get("k").await.unwrap(), Some(json!(1)));
    }

    #[test]
    fn test_debug_reports_capacity() {
        let rendered = format!("{:?}", backend(3));
        assert!(rendered.contains("InMemoryBackend"));
        assert!(rendered.contains("3"));
    }

    #[tokio::test]
    async fn test_set_then_get_returns_last_value() {
        let backend = backend(4);
        backend.set("k", json!("first"), None).await.unwrap();
        backend.set("k", json!("second"), None).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(json!("second")));
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_get_refreshes_recency() {
        // set(A); set(B); get(A); set(C) => B evicted
        let backend = backend(2);
        backend.set("A", json!(1), None).await.unwrap();
        backend.set("B", json!(2), None).await.unwrap();
        assert!(backend.get("A").await.unwrap().is_some());
        backend.set("C", json!(3), None).await.unwrap();

        assert!(!backend.exists("B").await.unwrap());
        assert!(backend.exists("A").await.unwrap());
        assert!(backend.exists("C").await.unwrap());
        assert_eq!(backend.stats().await.unwrap().evictions, 1);
    }

    #[tokio::test]
    async fn test_set_refreshes_recency() {
        let backend = backend(2);
        backend.set("A", json!(1), None).await.unwrap();
        backend.set("B", json!(2), None).await.unwrap();
        backend.set("A", json!(10), None).await.unwrap();
        backend.set("C", json!(3), None).await.unwrap();

        assert_eq!(backend.keys_by_recency(), vec!["A".to_string(), "C".to_string()]);
        assert_eq!(backend.get("A").await.unwrap(), Some(json!(10)));
    }

    #[tokio::test]
    async fn test_exists_does_not_refresh_recency() {
        let backend = backend(2);
        backend.set("A", json!(1), None).await.unwrap();
        backend.set("B", json!(2), None).await.unwrap();
        assert!(backend.exists("A").await.unwrap());
        backend.set("C", json!(3), None).await.unwrap();
        assert!(!backend.exists("A").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_expiry_is_lazy() {
        let backend = backend(4);
        backend
            .set("short", json!("v"), Some(Duration::from_millis(30)))
            .await
            .unwrap();
        backend
            .set("long", json!("v"), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert!(backend.get("short").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        // Still resident until touched.
        assert_eq!(backend.len(), 2);
        assert!(backend.get("short").await.unwrap().is_none());
        assert_eq!(backend.len(), 1);
        assert!(backend.get("long").await.unwrap().is_some());

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.expirations, 1);
    }

    #[tokio::test]
    async fn test_delete_reports_removal() {
        let backend = backend(4);
        backend.set("k", json!(1), None).await.unwrap();
        assert!(backend.delete("k").await.unwrap());
        assert!(!backend.delete("k").await.unwrap());
        assert!(backend.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_pattern_counts_exact_removals() {
        let backend = backend(10);
        for key in ["user:1", "user:2", "post:1", "Users.list"] {
            backend.set(key, json!(key), None).await.unwrap();
        }
        let removed = backend.clear_pattern("user:").await.unwrap();
        assert_eq!(removed, 2);
        assert!(!backend.exists("user:1").await.unwrap());
        assert!(!backend.exists("user:2").await.unwrap());
        assert!(backend.exists("post:1").await.unwrap());
        assert!(backend.exists("Users.list").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_empties_backend() {
        let backend = backend(4);
        backend.set("a", json!(1), None).await.unwrap();
        backend.set("b", json!(2), None).await.unwrap();
        assert!(backend.clear().await.unwrap());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_stats_track_hits_and_misses() {
        let backend = backend(4);
        let _ = backend.get("missing").await.unwrap();
        backend.set("k", json!(1), None).await.unwrap();
        let _ = backend.get("k").await.unwrap();
        let _ = backend.get("k").await.unwrap();

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_writers_respect_capacity() {
        let backend = std::sync::Arc::new(backend(32));
        let mut handles = Vec::new();
        for task in 0..8u64 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..200u64 {
                    let key = format!("t{task}:k{}", i % 50);
                    backend.set(&key, json!(i), None).await.unwrap();
                    let _ = backend.get(&key).await.unwrap();
                    assert!(backend.len() <= 32);
                }
            }));
        }
        for handle in handles {
            handle.await.expect("writer task");
        }

        assert!(backend.len() <= backend.capacity());
        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.hits + stats.misses, 8 * 200);
    }
}
