//! Tessera Core - Shared Types
//!
//! Error taxonomy, construction-time configuration, health reporting and the
//! content hashing helpers used for cache keys and profiler buckets. Every
//! other tessera crate depends on this one; it holds no mutable state.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

pub mod config;
pub mod error;
pub mod health;

pub use config::{
    BackendKind, RemoteBackendConfig, TesseraConfig, DEFAULT_CACHE_CAPACITY,
    DEFAULT_MIN_RECOMMENDATION_FREQUENCY, DEFAULT_SLOW_LOG_CAPACITY,
};
pub use error::{
    CacheError, ConfigError, IndexError, RecommendationError, TesseraError, TesseraResult,
};
pub use health::{HealthCheck, HealthStatus};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// SHA-256 content hash.
pub type ContentHash = [u8; 32];

/// Width of the short hashes embedded in cache keys.
pub const SHORT_HASH_LEN: usize = 8;

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Hex-encoded SHA-256 prefix of `content`, `width` characters long.
///
/// `width` is clamped to the 64 characters of a full digest.
pub fn hex_digest_prefix(content: &[u8], width: usize) -> String {
    let mut hex = hex::encode(compute_content_hash(content));
    hex.truncate(width.min(64));
    hex
}

/// Fixed-width short hash used inside derived cache keys.
pub fn short_hash(content: &[u8]) -> String {
    hex_digest_prefix(content, SHORT_HASH_LEN)
}

/// Truncate `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Truncation never exceeds the requested char count and is a prefix.
        #[test]
        fn prop_truncate_chars_is_prefix(text in ".{0,64}", max in 0usize..80) {
            let out = truncate_chars(&text, max);
            prop_assert!(out.chars().count() <= max);
            prop_assert!(text.starts_with(out));
        }
    }
}
