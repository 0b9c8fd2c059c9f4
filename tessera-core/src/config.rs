//! Configuration types
//!
//! All values are read once at construction time by the composition root;
//! nothing here is hot-reloaded.

use crate::{ConfigError, TesseraError, TesseraResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CACHE_CAPACITY: usize = 1000;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_QUERY_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_QUERY_CACHE_CAPACITY: usize = 500;
pub const DEFAULT_SLOW_QUERY_THRESHOLD_MS: u64 = 1000;
pub const DEFAULT_SLOW_LOG_CAPACITY: usize = 100;
pub const DEFAULT_MIN_RECOMMENDATION_FREQUENCY: u64 = 10;
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_REDIS_NAMESPACE: &str = "tessera";
pub const DEFAULT_REDIS_TIMEOUT_MS: u64 = 2000;

/// Which storage substrate backs the general-purpose cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Bounded in-process store with LRU eviction.
    #[default]
    InProcess,
    /// Shared Redis instance; the only coherent choice for multiple processes.
    Remote,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in_process" | "inprocess" | "local" => Ok(Self::InProcess),
            "redis" | "remote" => Ok(Self::Remote),
            other => Err(ConfigError::InvalidValue {
                field: "backend".to_string(),
                value: other.to_string(),
                reason: "expected one of: memory, redis".to_string(),
            }),
        }
    }
}

/// Connection settings for the remote backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteBackendConfig {
    pub url: String,
    pub username: Option<String>,
    /// Never serialized into reports.
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Prefix applied to every key; `clear` only touches this namespace.
    pub namespace: String,
    /// Upper bound on a single remote call, handshake included.
    pub op_timeout: Duration,
}

impl Default for RemoteBackendConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
            username: None,
            password: None,
            namespace: DEFAULT_REDIS_NAMESPACE.to_string(),
            op_timeout: Duration::from_millis(DEFAULT_REDIS_TIMEOUT_MS),
        }
    }
}

/// Master configuration for a tessera runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TesseraConfig {
    // General-purpose cache
    pub backend: BackendKind,
    pub remote: RemoteBackendConfig,
    /// TTL applied by the cache facade when a caller passes none.
    /// `None` stores entries without expiry.
    pub default_ttl: Option<Duration>,
    /// Entry bound for the in-process backend.
    pub capacity: usize,
    /// When false, wrapped calls bypass the cache entirely.
    pub caching_enabled: bool,

    // Query result cache
    pub optimizer_ttl: Duration,
    pub optimizer_capacity: usize,

    // Profiling
    pub slow_query_threshold: Duration,
    pub slow_log_capacity: usize,

    // Index advice
    pub min_recommendation_frequency: u64,
}

impl Default for TesseraConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::InProcess,
            remote: RemoteBackendConfig::default(),
            default_ttl: Some(Duration::from_secs(DEFAULT_CACHE_TTL_SECS)),
            capacity: DEFAULT_CACHE_CAPACITY,
            caching_enabled: true,
            optimizer_ttl: Duration::from_secs(DEFAULT_QUERY_CACHE_TTL_SECS),
            optimizer_capacity: DEFAULT_QUERY_CACHE_CAPACITY,
            slow_query_threshold: Duration::from_millis(DEFAULT_SLOW_QUERY_THRESHOLD_MS),
            slow_log_capacity: DEFAULT_SLOW_LOG_CAPACITY,
            min_recommendation_frequency: DEFAULT_MIN_RECOMMENDATION_FREQUENCY,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl TesseraConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `TESSERA_CACHE_BACKEND`: `memory` or `redis` (default: memory)
    /// - `TESSERA_REDIS_URL`: remote endpoint (default: redis://127.0.0.1:6379)
    /// - `TESSERA_REDIS_USERNAME` / `TESSERA_REDIS_PASSWORD`: remote credentials
    /// - `TESSERA_REDIS_NAMESPACE`: key namespace (default: tessera)
    /// - `TESSERA_REDIS_TIMEOUT_MS`: per-call timeout (default: 2000)
    /// - `TESSERA_CACHE_DEFAULT_TTL_SECS`: default TTL, 0 disables expiry (default: 3600)
    /// - `TESSERA_CACHE_CAPACITY`: in-process entry bound (default: 1000)
    /// - `TESSERA_CACHE_ENABLED`: `false` bypasses wrapped calls (default: true)
    /// - `TESSERA_QUERY_CACHE_TTL_SECS`: query result window (default: 300)
    /// - `TESSERA_QUERY_CACHE_CAPACITY`: query result bound (default: 500)
    /// - `TESSERA_SLOW_QUERY_THRESHOLD_MS`: slow threshold (default: 1000)
    /// - `TESSERA_SLOW_LOG_CAPACITY`: slow log ring size (default: 100)
    /// - `TESSERA_INDEX_MIN_FREQUENCY`: recommendation cutoff (default: 10)
    ///
    /// An unparseable backend kind is reported rather than silently defaulted.
    pub fn from_env() -> TesseraResult<Self> {
        let defaults = Self::default();

        let backend = match std::env::var("TESSERA_CACHE_BACKEND") {
            Ok(raw) => raw.parse::<BackendKind>()?,
            Err(_) => defaults.backend,
        };

        let remote = RemoteBackendConfig {
            url: std::env::var("TESSERA_REDIS_URL").unwrap_or(defaults.remote.url),
            username: std::env::var("TESSERA_REDIS_USERNAME").ok(),
            password: std::env::var("TESSERA_REDIS_PASSWORD").ok(),
            namespace: std::env::var("TESSERA_REDIS_NAMESPACE")
                .unwrap_or(defaults.remote.namespace),
            op_timeout: env_parse::<u64>("TESSERA_REDIS_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.remote.op_timeout),
        };

        let default_ttl = match env_parse::<u64>("TESSERA_CACHE_DEFAULT_TTL_SECS") {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.default_ttl,
        };

        let caching_enabled = std::env::var("TESSERA_CACHE_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(defaults.caching_enabled);

        let config = Self {
            backend,
            remote,
            default_ttl,
            capacity: env_parse("TESSERA_CACHE_CAPACITY").unwrap_or(defaults.capacity),
            caching_enabled,
            optimizer_ttl: env_parse::<u64>("TESSERA_QUERY_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.optimizer_ttl),
            optimizer_capacity: env_parse("TESSERA_QUERY_CACHE_CAPACITY")
                .unwrap_or(defaults.optimizer_capacity),
            slow_query_threshold: env_parse::<u64>("TESSERA_SLOW_QUERY_THRESHOLD_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.slow_query_threshold),
            slow_log_capacity: env_parse("TESSERA_SLOW_LOG_CAPACITY")
                .unwrap_or(defaults.slow_log_capacity),
            min_recommendation_frequency: env_parse("TESSERA_INDEX_MIN_FREQUENCY")
                .unwrap_or(defaults.min_recommendation_frequency),
        };

        config.validate()?;
        Ok(config)
    }

    /// Select the backend kind.
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Set the remote backend settings.
    pub fn with_remote(mut self, remote: RemoteBackendConfig) -> Self {
        self.remote = remote;
        self
    }

    /// Set the default TTL (`None` for no expiry).
    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the in-process capacity bound.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Enable or disable wrapped-call caching.
    pub fn with_caching_enabled(mut self, enabled: bool) -> Self {
        self.caching_enabled = enabled;
        self
    }

    /// Set the query result window and bound.
    pub fn with_optimizer(mut self, ttl: Duration, capacity: usize) -> Self {
        self.optimizer_ttl = ttl;
        self.optimizer_capacity = capacity;
        self
    }

    /// Set the slow-query threshold.
    pub fn with_slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = threshold;
        self
    }

    /// Set the minimum frequency for index recommendations.
    pub fn with_min_recommendation_frequency(mut self, min: u64) -> Self {
        self.min_recommendation_frequency = min;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> TesseraResult<()> {
        fn invalid(field: &str, value: impl ToString, reason: &str) -> TesseraError {
            TesseraError::Config(ConfigError::InvalidValue {
                field: field.to_string(),
                value: value.to_string(),
                reason: reason.to_string(),
            })
        }

        if self.capacity == 0 {
            return Err(invalid("capacity", self.capacity, "must be greater than 0"));
        }
        if self.optimizer_capacity == 0 {
            return Err(invalid(
                "optimizer_capacity",
                self.optimizer_capacity,
                "must be greater than 0",
            ));
        }
        if self.optimizer_ttl.is_zero() {
            return Err(invalid("optimizer_ttl", "0s", "must be greater than 0"));
        }
        if self.slow_log_capacity == 0 {
            return Err(invalid(
                "slow_log_capacity",
                self.slow_log_capacity,
                "must be greater than 0",
            ));
        }
        if self.backend == BackendKind::Remote {
            if self.remote.url.trim().is_empty() {
                return Err(TesseraError::Config(ConfigError::MissingRequired {
                    field: "remote.url".to_string(),
                }));
            }
            if self.remote.op_timeout.is_zero() {
                return Err(invalid("remote.op_timeout", "0ms", "must be greater than 0"));
            }
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TesseraConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backend, BackendKind::InProcess);
        assert_eq!(config.slow_query_threshold, Duration::from_secs(1));
        assert_eq!(config.slow_log_capacity, 100);
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("memory".parse::<BackendKind>(), Ok(BackendKind::InProcess));
        assert_eq!(" Redis ".parse::<BackendKind>(), Ok(BackendKind::Remote));
        assert!("memcached".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_builder_setters() {
        let config = TesseraConfig::new()
            .with_backend(BackendKind::Remote)
            .with_default_ttl(None)
            .with_capacity(5)
            .with_caching_enabled(false)
            .with_optimizer(Duration::from_secs(30), 7)
            .with_slow_query_threshold(Duration::from_millis(250))
            .with_min_recommendation_frequency(3);

        assert_eq!(config.backend, BackendKind::Remote);
        assert_eq!(config.default_ttl, None);
        assert_eq!(config.capacity, 5);
        assert!(!config.caching_enabled);
        assert_eq!(config.optimizer_ttl, Duration::from_secs(30));
        assert_eq!(config.optimizer_capacity, 7);
        assert_eq!(config.slow_query_threshold, Duration::from_millis(250));
        assert_eq!(config.min_recommendation_frequency, 3);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let result = TesseraConfig::new().with_capacity(0).validate();
        match result {
            Err(TesseraError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "capacity")
            }
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_empty_remote_url() {
        let remote = RemoteBackendConfig {
            url: "  ".to_string(),
            ..RemoteBackendConfig::default()
        };
        let result = TesseraConfig::new()
            .with_backend(BackendKind::Remote)
            .with_remote(remote)
            .validate();
        assert!(matches!(
            result,
            Err(TesseraError::Config(ConfigError::MissingRequired { .. }))
        ));
    }

    #[test]
    fn test_remote_url_ignored_for_in_process() {
        let remote = RemoteBackendConfig {
            url: String::new(),
            ..RemoteBackendConfig::default()
        };
        assert!(TesseraConfig::new().with_remote(remote).validate().is_ok());
    }

    #[test]
    fn test_password_not_serialized() {
        let remote = RemoteBackendConfig {
            password: Some("hunter2".to_string()),
            ..RemoteBackendConfig::default()
        };
        let json = serde_json::to_string(&remote).expect("serialize");
        assert!(!json.contains("hunter2"));
    }
}
