//! Cache facade with degrade-to-miss semantics.
//!
//! [`CacheLayer`] wraps any [`CacheBackend`] with typed access, counters and
//! read-through helpers. Backend faults never reach callers: a failing
//! backend turns every read into a miss and every write into a no-op, and
//! the error counter records it.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tessera_core::{CacheError, HealthCheck, TesseraConfig};
use tracing::{debug, warn};

use crate::backend::{CacheBackend, CacheStats, CacheValue};
use crate::key::CacheKey;

const COMPONENT: &str = "cache";

/// Configuration for the cache facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayerConfig {
    /// TTL applied when a caller passes none. `None` never expires.
    pub default_ttl: Option<Duration>,
    /// When false, [`CacheLayer::cached_call`] always runs its thunk.
    pub enabled: bool,
}

impl Default for CacheLayerConfig {
    fn default() -> Self {
        Self {
            default_ttl: Some(Duration::from_secs(tessera_core::config::DEFAULT_CACHE_TTL_SECS)),
            enabled: true,
        }
    }
}

impl CacheLayerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl From<&TesseraConfig> for CacheLayerConfig {
    fn from(config: &TesseraConfig) -> Self {
        Self {
            default_ttl: config.default_ttl,
            enabled: config.caching_enabled,
        }
    }
}

/// Snapshot of facade counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
}

impl LayerStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> LayerStats {
        LayerStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.sets,
            &self.deletes,
            &self.errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Uniform cache facade shared by handle across the process.
///
/// # Example
///
/// ```ignore
/// let layer = CacheLayer::from_config(&config)?;
/// let key = CacheKey::for_operation::<UserService>("profile").arg(user_id).build();
/// let profile: Profile = layer
///     .cached_call(&key, None, || async { repo.load_profile(user_id).await })
///     .await?;
/// ```
pub struct CacheLayer {
    backend: Arc<dyn CacheBackend>,
    config: CacheLayerConfig,
    counters: Counters,
}

impl std::fmt::Debug for CacheLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLayer")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .field("stats", &self.counters.snapshot())
            .finish()
    }
}

impl CacheLayer {
    /// Create a facade over an existing backend.
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheLayerConfig) -> Self {
        Self {
            backend,
            config,
            counters: Counters::default(),
        }
    }

    /// Create a facade with default configuration.
    pub fn with_defaults(backend: Arc<dyn CacheBackend>) -> Self {
        Self::new(backend, CacheLayerConfig::default())
    }

    /// Build the configured backend and wrap it.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration. Remote backends do not connect here.
    pub fn from_config(config: &TesseraConfig) -> tessera_core::TesseraResult<Self> {
        let backend = crate::backend::build_backend(config)?;
        Ok(Self::new(backend, CacheLayerConfig::from(config)))
    }

    pub fn config(&self) -> &CacheLayerConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    fn record_error(&self, op: &'static str, key: &str, err: &CacheError) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        warn!(
            backend = self.backend.name(),
            op,
            key,
            error = %err,
            "cache backend fault absorbed"
        );
    }

    fn resolve_ttl(&self, ttl: Option<Duration>) -> Option<Duration> {
        ttl.or(self.config.default_ttl)
    }

    /// Raw lookup. Backend faults count as a miss.
    pub async fn get_value(&self, key: &str) -> Option<CacheValue> {
        match self.backend.get(key).await {
            Ok(Some(value)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(err) => {
                self.record_error("get", key, &err);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Typed lookup. A stored value that doesn't decode as `T` is a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = match self.backend.get(key).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(err) => {
                self.record_error("get", key, &err);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        match serde_json::from_value(value) {
            Ok(decoded) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(decoded)
            }
            Err(err) => {
                self.record_error("get", key, &CacheError::unavailable(self.backend.name(), err));
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a raw value. Returns false if the backend refused or failed.
    pub async fn set_value(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> bool {
        match self.backend.set(key, value, self.resolve_ttl(ttl)).await {
            Ok(stored) => {
                if stored {
                    self.counters.sets.fetch_add(1, Ordering::Relaxed);
                }
                stored
            }
            Err(err) => {
                self.record_error("set", key, &err);
                false
            }
        }
    }

    /// Store a typed value.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        match serde_json::to_value(value) {
            Ok(encoded) => self.set_value(key, encoded, ttl).await,
            Err(err) => {
                self.record_error("set", key, &CacheError::unavailable(self.backend.name(), err));
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        match self.backend.delete(key).await {
            Ok(removed) => {
                if removed {
                    self.counters.deletes.fetch_add(1, Ordering::Relaxed);
                }
                removed
            }
            Err(err) => {
                self.record_error("delete", key, &err);
                false
            }
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        match self.backend.exists(key).await {
            Ok(found) => found,
            Err(err) => {
                self.record_error("exists", key, &err);
                false
            }
        }
    }

    pub async fn clear(&self) -> bool {
        match self.backend.clear().await {
            Ok(cleared) => cleared,
            Err(err) => {
                self.record_error("clear", "*", &err);
                false
            }
        }
    }

    /// Remove every key containing `substring`. Returns the number removed.
    pub async fn invalidate_pattern(&self, substring: &str) -> u64 {
        match self.backend.clear_pattern(substring).await {
            Ok(removed) => {
                self.counters.deletes.fetch_add(removed, Ordering::Relaxed);
                debug!(pattern = substring, removed, "invalidated cache pattern");
                removed
            }
            Err(err) => {
                self.record_error("clear_pattern", substring, &err);
                0
            }
        }
    }

    /// Return the cached value for `key`, or run `factory` and cache its result.
    ///
    /// On a hit `factory` is not invoked. A factory error is returned as-is
    /// and nothing is cached. Concurrent misses for the same key may each run
    /// their factory; the last write wins.
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        factory: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get::<T>(key).await {
            return Ok(cached);
        }

        let value = factory().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    /// Read-through wrapper for a read operation keyed by `key`.
    ///
    /// Returns the thunk's result whether or not caching is enabled.
    pub async fn cached_call<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Option<Duration>,
        thunk: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.config.enabled {
            return thunk().await;
        }
        self.get_or_set(key.as_str(), ttl, thunk).await
    }

    /// Run a write, then invalidate `patterns` only if it succeeded.
    pub async fn invalidating_write<T, E, F, Fut>(&self, patterns: &[&str], write: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let outcome = write().await?;
        for pattern in patterns {
            self.invalidate_pattern(pattern).await;
        }
        Ok(outcome)
    }

    pub fn stats(&self) -> LayerStats {
        self.counters.snapshot()
    }

    pub fn reset_stats(&self) {
        self.counters.reset();
    }

    /// Statistics reported by the backend itself.
    pub async fn backend_stats(&self) -> Option<CacheStats> {
        match self.backend.stats().await {
            Ok(stats) => Some(stats),
            Err(err) => {
                self.record_error("stats", "*", &err);
                None
            }
        }
    }

    /// Probe the backend. An unreachable backend reports `Degraded`, since
    /// the facade keeps serving as always-miss.
    pub async fn health(&self) -> HealthCheck {
        let started = Instant::now();
        let probe = self.backend.ping().await;
        let elapsed_ms = started.elapsed().as_millis() as i64;
        let stats = self.stats();

        let check = match probe {
            Ok(()) => HealthCheck::healthy(COMPONENT),
            Err(err) => HealthCheck::degraded(COMPONENT, err.to_string()),
        };
        check
            .with_response_time(elapsed_ms)
            .with_metadata("backend", serde_json::json!(self.backend.name()))
            .with_metadata("hit_rate", serde_json::json!(stats.hit_rate()))
            .with_metadata("errors", serde_json::json!(stats.errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CacheResult, InMemoryBackend};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tessera_core::HealthStatus;

    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        fn name(&self) -> &'static str {
            "broken"
        }
        async fn get(&self, _key: &str) -> CacheResult<Option<CacheValue>> {
            Err(CacheError::unavailable("broken", "connection refused"))
        }
        async fn set(&self, _key: &str, _value: CacheValue, _ttl: Option<Duration>) -> CacheResult<bool> {
            Err(CacheError::unavailable("broken", "connection refused"))
        }
        async fn delete(&self, _key: &str) -> CacheResult<bool> {
            Err(CacheError::unavailable("broken", "connection refused"))
        }
        async fn exists(&self, _key: &str) -> CacheResult<bool> {
            Err(CacheError::unavailable("broken", "connection refused"))
        }
        async fn clear(&self) -> CacheResult<bool> {
            Err(CacheError::unavailable("broken", "connection refused"))
        }
        async fn clear_pattern(&self, _substring: &str) -> CacheResult<u64> {
            Err(CacheError::unavailable("broken", "connection refused"))
        }
        async fn ping(&self) -> CacheResult<()> {
            Err(CacheError::unavailable("broken", "connection refused"))
        }
        async fn stats(&self) -> CacheResult<CacheStats> {
            Err(CacheError::unavailable("broken", "connection refused"))
        }
    }

    fn memory_layer(capacity: usize) -> CacheLayer {
        let backend = InMemoryBackend::new(capacity).expect("non-zero capacity");
        CacheLayer::with_defaults(Arc::new(backend))
    }

    #[tokio::test]
    async fn test_typed_round_trip_counts() {
        let layer = memory_layer(8);
        assert!(layer.set("user:1", &vec![1, 2, 3], None).await);
        let value: Option<Vec<i32>> = layer.get("user:1").await;
        assert_eq!(value, Some(vec![1, 2, 3]));
        assert_eq!(layer.get::<Vec<i32>>("user:2").await, None);

        let stats = layer.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn test_get_or_set_skips_factory_on_hit() {
        let layer = memory_layer(8);
        let calls = AtomicUsize::new(0);

        let first: Result<String, ()> = layer
            .get_or_set("greeting", None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("hello".to_string())
            })
            .await;
        assert_eq!(first, Ok("hello".to_string()));
        assert!(layer.exists("greeting").await);

        let second: Result<String, ()> = layer
            .get_or_set("greeting", None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("other".to_string())
            })
            .await;
        assert_eq!(second, Ok("hello".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_set_factory_error_caches_nothing() {
        let layer = memory_layer(8);
        let result: Result<u32, &str> = layer
            .get_or_set("k", None, || async { Err("upstream down") })
            .await;
        assert_eq!(result, Err("upstream down"));
        assert!(!layer.exists("k").await);
    }

    #[tokio::test]
    async fn test_broken_backend_degrades_to_miss() {
        let layer = CacheLayer::with_defaults(Arc::new(BrokenBackend));

        assert_eq!(layer.get_value("k").await, None);
        assert!(!layer.set_value("k", json!(1), None).await);
        assert!(!layer.delete("k").await);
        assert!(!layer.exists("k").await);
        assert_eq!(layer.invalidate_pattern("k").await, 0);

        let computed: Result<u32, ()> = layer.get_or_set("k", None, || async { Ok(7) }).await;
        assert_eq!(computed, Ok(7));

        let stats = layer.stats();
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.hits, 0);
        // get, set, delete, exists, clear_pattern, then get + set inside get_or_set
        assert_eq!(stats.errors, 7);
    }

    #[tokio::test]
    async fn test_undecodable_value_is_miss() {
        let layer = memory_layer(8);
        layer.set_value("n", json!("not a number"), None).await;
        assert_eq!(layer.get::<u64>("n").await, None);
        let stats = layer.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.errors, 1);
    }

    #[tokio::test]
    async fn test_invalidate_pattern_adds_to_deletes() {
        let layer = memory_layer(16);
        for key in ["user:1", "user:2", "order:1"] {
            layer.set_value(key, json!(key), None).await;
        }
        assert_eq!(layer.invalidate_pattern("user:").await, 2);
        assert!(layer.exists("order:1").await);
        assert_eq!(layer.stats().deletes, 2);
    }

    #[tokio::test]
    async fn test_cached_call_disabled_always_runs_thunk() {
        let backend = Arc::new(InMemoryBackend::new(8).expect("capacity"));
        let layer = CacheLayer::new(backend, CacheLayerConfig::new().with_enabled(false));
        let key = CacheKey::named("report").arg(1).build();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let out: Result<u32, ()> = layer
                .cached_call(&key, None, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await;
            assert_eq!(out, Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!layer.exists(key.as_str()).await);
    }

    #[tokio::test]
    async fn test_invalidating_write_only_after_success() {
        let layer = memory_layer(16);
        layer.set_value("user:1:profile", json!("cached"), None).await;

        let failed: Result<(), &str> = layer
            .invalidating_write(&["user:1"], || async { Err("constraint violation") })
            .await;
        assert!(failed.is_err());
        assert!(layer.exists("user:1:profile").await);

        let ok: Result<u32, &str> = layer
            .invalidating_write(&["user:1"], || async { Ok(1) })
            .await;
        assert_eq!(ok, Ok(1));
        assert!(!layer.exists("user:1:profile").await);
    }

    #[tokio::test]
    async fn test_health_reports_degraded_backend() {
        let healthy = memory_layer(4).health().await;
        assert_eq!(healthy.status, HealthStatus::Healthy);

        let degraded = CacheLayer::with_defaults(Arc::new(BrokenBackend)).health().await;
        assert_eq!(degraded.status, HealthStatus::Degraded);
        assert!(degraded.message.is_some());
    }

    #[tokio::test]
    async fn test_reset_stats() {
        let layer = memory_layer(4);
        layer.get_value("missing").await;
        assert_eq!(layer.stats().misses, 1);
        layer.reset_stats();
        assert_eq!(layer.stats(), LayerStats::default());
    }

    #[test]
    fn test_config_from_tessera_config() {
        let config = TesseraConfig::new()
            .with_default_ttl(None)
            .with_caching_enabled(false);
        let layer_config = CacheLayerConfig::from(&config);
        assert_eq!(layer_config.default_ttl, None);
        assert!(!layer_config.enabled);
    }
}
