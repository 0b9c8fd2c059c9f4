//! Cache backend trait and statistics.
//!
//! This module defines the contract every storage substrate implements.
//! Values are opaque JSON documents; typed access lives in the facade.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tessera_core::CacheError;

/// Opaque cached value.
pub type CacheValue = serde_json::Value;

/// Result type for backend operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache backend trait for pluggable cache implementations.
///
/// This trait abstracts over the in-process store and the remote store.
/// Implementations must be thread-safe and support concurrent access from
/// many request-handling tasks.
///
/// # Errors
///
/// Connectivity, serialization and lock faults are reported as
/// [`CacheError`]. Backends never substitute a stale or default value for a
/// failed read, and they never retry on their own.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short identifier used in logs and health reports.
    fn name(&self) -> &'static str;

    /// Get a live value, or `None` on miss or expiry.
    async fn get(&self, key: &str) -> CacheResult<Option<CacheValue>>;

    /// Insert or replace a value. `ttl` of `None` (or zero) never expires.
    async fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>)
        -> CacheResult<bool>;

    /// Remove a key. Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Whether a live entry exists. Does not count as an access.
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Remove every entry owned by this backend.
    async fn clear(&self) -> CacheResult<bool>;

    /// Remove every key containing `substring`; returns the number removed.
    async fn clear_pattern(&self, substring: &str) -> CacheResult<u64>;

    /// Cheap reachability probe.
    async fn ping(&self) -> CacheResult<()>;

    /// Get cache statistics.
    async fn stats(&self) -> CacheResult<CacheStats>;
}

/// Statistics about backend usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses, expiries included.
    pub misses: u64,
    /// Number of entries currently held; 0 for backends that don't track it.
    pub entry_count: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
    /// Number of entries dropped lazily after their TTL passed.
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Normalize a caller TTL: zero means no expiry.
pub(crate) fn effective_ttl(ttl: Option<Duration>) -> Option<Duration> {
    ttl.filter(|t| !t.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_zero_ttl_means_no_expiry() {
        assert_eq!(effective_ttl(Some(Duration::ZERO)), None);
        assert_eq!(effective_ttl(None), None);
        assert_eq!(
            effective_ttl(Some(Duration::from_secs(5))),
            Some(Duration::from_secs(5))
        );
    }
}
