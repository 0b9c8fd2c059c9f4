//! Tessera Test Utilities
//!
//! Shared test infrastructure for the tessera workspace:
//! - Mock backends that fail or count calls
//! - Proptest generators for keys, values and access shapes
//! - Fixtures for common configurations
//! - Assertions over the error taxonomy

pub use tessera_cache::{
    CacheBackend, CacheLayer, CacheLayerConfig, CacheResult, CacheStats, CacheValue,
    InMemoryBackend,
};
pub use tessera_core::{
    CacheError, ConfigError, IndexError, RecommendationError, TesseraConfig, TesseraError,
    TesseraResult,
};

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

// ============================================================================
// MOCK BACKENDS
// ============================================================================

/// Backend whose every call fails with `BackendUnavailable`.
///
/// Counts calls so tests can assert the facade reached it.
#[derive(Debug, Default)]
pub struct FailingBackend {
    calls: AtomicU64,
}

impl FailingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn fail<T>(&self) -> CacheResult<T> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Err(CacheError::unavailable("failing", "connection refused"))
    }
}

#[async_trait]
impl CacheBackend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn get(&self, _key: &str) -> CacheResult<Option<CacheValue>> {
        self.fail()
    }

    async fn set(&self, _key: &str, _value: CacheValue, _ttl: Option<Duration>) -> CacheResult<bool> {
        self.fail()
    }

    async fn delete(&self, _key: &str) -> CacheResult<bool> {
        self.fail()
    }

    async fn exists(&self, _key: &str) -> CacheResult<bool> {
        self.fail()
    }

    async fn clear(&self) -> CacheResult<bool> {
        self.fail()
    }

    async fn clear_pattern(&self, _substring: &str) -> CacheResult<u64> {
        self.fail()
    }

    async fn ping(&self) -> CacheResult<()> {
        self.fail()
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        self.fail()
    }
}

/// In-process backend that counts `get` and `set` calls.
#[derive(Debug)]
pub struct CountingBackend {
    inner: InMemoryBackend,
    gets: AtomicU64,
    sets: AtomicU64,
}

impl CountingBackend {
    pub fn new(capacity: usize) -> TesseraResult<Self> {
        Ok(Self {
            inner: InMemoryBackend::new(capacity)?,
            gets: AtomicU64::new(0),
            sets: AtomicU64::new(0),
        })
    }

    pub fn gets(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    pub fn sets(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CacheBackend for CountingBackend {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<CacheValue>> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> CacheResult<bool> {
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.inner.exists(key).await
    }

    async fn clear(&self) -> CacheResult<bool> {
        self.inner.clear().await
    }

    async fn clear_pattern(&self, substring: &str) -> CacheResult<u64> {
        self.inner.clear_pattern(substring).await
    }

    async fn ping(&self) -> CacheResult<()> {
        self.inner.ping().await
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        self.inner.stats().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache keys, values and access shapes.

    use proptest::prelude::*;
    use serde_json::{json, Value};

    /// Short colon-separated cache keys such as `user:12`.
    pub fn arb_cache_key() -> impl Strategy<Value = String> {
        "(user|order|item|feed):[0-9]{1,4}"
    }

    /// JSON values of modest depth.
    pub fn arb_json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[a-z0-9 ]{0,16}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    /// Keyword arguments as a list of distinct `(name, value)` pairs.
    pub fn arb_kwargs() -> impl Strategy<Value = Vec<(String, Value)>> {
        prop::collection::btree_map("[a-z_]{1,8}", arb_json_value(), 0..6)
            .prop_map(|m| m.into_iter().collect())
    }

    /// Lowercase table names.
    pub fn arb_table_name() -> impl Strategy<Value = String> {
        "[a-z][a-z_]{0,11}"
    }

    /// Non-empty column sets, possibly with duplicates.
    pub fn arb_columns() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec("[a-z][a-z_]{0,9}", 1..5)
    }

    /// Execution times in seconds, 0 to 5 s at microsecond resolution.
    pub fn arb_execution_secs() -> impl Strategy<Value = f64> {
        (0u64..5_000_000).prop_map(|micros| micros as f64 / 1_000_000.0)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built configurations and facades.

    use super::*;
    use std::sync::Arc;

    /// In-process configuration with small bounds and no default TTL.
    pub fn small_config() -> TesseraConfig {
        TesseraConfig::new()
            .with_capacity(16)
            .with_default_ttl(None)
            .with_optimizer(Duration::from_secs(60), 16)
            .with_min_recommendation_frequency(5)
    }

    /// Facade over a fresh in-process backend.
    pub fn memory_layer(capacity: usize) -> CacheLayer {
        let backend = InMemoryBackend::new(capacity).expect("fixture capacity must be non-zero");
        CacheLayer::new(Arc::new(backend), CacheLayerConfig::new().with_default_ttl(None))
    }

    /// Facade over a [`FailingBackend`], plus a handle to it.
    pub fn failing_layer() -> (CacheLayer, Arc<FailingBackend>) {
        let backend = Arc::new(FailingBackend::new());
        let layer = CacheLayer::with_defaults(backend.clone());
        (layer, backend)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over the tessera error taxonomy.

    use super::*;

    /// Assert that a TesseraResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &TesseraResult<T>) {
        match result {
            Err(TesseraError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a cache call failed with `BackendUnavailable`.
    #[track_caller]
    pub fn assert_backend_unavailable<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::BackendUnavailable { .. }) => {}
            other => panic!("Expected BackendUnavailable, got: {:?}", other),
        }
    }

    /// Assert that a recommendation input was rejected for `field`.
    #[track_caller]
    pub fn assert_invalid_input<T: std::fmt::Debug>(
        result: &Result<T, RecommendationError>,
        expected_field: &str,
    ) {
        match result {
            Err(RecommendationError::InvalidInput { field, .. }) => {
                assert_eq!(field, expected_field, "Wrong field in InvalidInput error");
            }
            other => panic!("Expected InvalidInput for {}, got: {:?}", expected_field, other),
        }
    }

    /// Assert two floats agree to within `1e-9`.
    #[track_caller]
    pub fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "Expected {expected}, got {actual}"
        );
    }
}
