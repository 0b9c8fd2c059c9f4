//! Tessera Cache - Backends and Cache Facade
//!
//! Storage substrates ([`InMemoryBackend`], [`RedisBackend`]) behind the
//! [`CacheBackend`] trait, deterministic [`CacheKey`] derivation, and the
//! [`CacheLayer`] facade that turns backend faults into misses.

pub mod backend;
pub mod key;
pub mod layer;

pub use backend::{
    build_backend, CacheBackend, CacheEntry, CacheResult, CacheStats, CacheValue,
    InMemoryBackend, RedisBackend,
};
pub use key::{CacheKey, CacheKeyBuilder};
pub use layer::{CacheLayer, CacheLayerConfig, LayerStats};
