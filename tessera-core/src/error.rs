//! Error types for tessera operations
//!
//! | Error | Policy |
//! |---|---|
//! | [`CacheError`] | absorbed at the cache facade as a miss plus an error count |
//! | [`RecommendationError`] | returned to the recording caller and logged |
//! | [`IndexError`] | recorded per recommendation, never aborts a batch |
//! | [`ConfigError`] | surfaced to the composition root at startup |

use thiserror::Error;

/// Cache substrate errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend {backend} unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Cache lock poisoned: {structure}")]
    LockPoisoned { structure: String },
}

impl CacheError {
    /// Shorthand for a connectivity or serialization fault.
    pub fn unavailable(backend: impl Into<String>, reason: impl ToString) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for a poisoned mutex guarding `structure`.
    pub fn poisoned(structure: impl Into<String>) -> Self {
        Self::LockPoisoned {
            structure: structure.into(),
        }
    }
}

/// Access-pattern recording errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecommendationError {
    #[error("Invalid recommendation input for {field}: {reason}")]
    InvalidInput { field: String, reason: String },
}

/// Index application errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("Index creation failed for {index_name}: {reason}")]
    CreationFailed { index_name: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all tessera errors.
#[derive(Debug, Clone, Error)]
pub enum TesseraError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Recommendation error: {0}")]
    Recommendation(#[from] RecommendationError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for tessera operations.
pub type TesseraResult<T> = Result<T, TesseraError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_display_unavailable() {
        let err = CacheError::unavailable("redis", "connection refused");
        let msg = format!("{}", err);
        assert!(msg.contains("unavailable"));
        assert!(msg.contains("redis"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_cache_error_display_lock_poisoned() {
        let err = CacheError::poisoned("lru entries");
        assert!(format!("{}", err).contains("lru entries"));
    }

    #[test]
    fn test_recommendation_error_display() {
        let err = RecommendationError::InvalidInput {
            field: "table".to_string(),
            reason: "must not be empty".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("table"));
        assert!(msg.contains("must not be empty"));
    }

    #[test]
    fn test_index_error_display() {
        let err = IndexError::CreationFailed {
            index_name: "idx_users_email".to_string(),
            reason: "relation does not exist".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("idx_users_email"));
        assert!(msg.contains("relation does not exist"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "capacity".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("capacity"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_tessera_error_from_variants() {
        let cache = TesseraError::from(CacheError::poisoned("x"));
        assert!(matches!(cache, TesseraError::Cache(_)));

        let rec = TesseraError::from(RecommendationError::InvalidInput {
            field: "columns".to_string(),
            reason: "empty".to_string(),
        });
        assert!(matches!(rec, TesseraError::Recommendation(_)));

        let index = TesseraError::from(IndexError::CreationFailed {
            index_name: "idx".to_string(),
            reason: "boom".to_string(),
        });
        assert!(matches!(index, TesseraError::Index(_)));

        let config = TesseraError::from(ConfigError::MissingRequired {
            field: "remote.url".to_string(),
        });
        assert!(matches!(config, TesseraError::Config(_)));
    }
}
