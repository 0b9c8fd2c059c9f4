//! Read-through cache for expensive read queries.
//!
//! Eligibility is decided by a two-sided text heuristic: any volatile signal
//! (mutation, recency-sensitive function, timestamp comparison) rules a query
//! out; otherwise it is cached only when it carries an expensive signal
//! (aggregation, grouping, ordering, join, distinct).
//!
//! Storage is separate from the cache backends. Entries live for a fixed TTL
//! window and are evicted in insertion order when the capacity is reached.
//! Reads never reorder entries.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tessera_core::{hex_digest_prefix, ConfigError, TesseraConfig, TesseraError, TesseraResult};
use tracing::{debug, warn};

/// Bound parameters of a query, sorted by name.
pub type QueryParams = BTreeMap<String, Value>;

const KEY_HASH_LEN: usize = 16;

static EXPENSIVE_SIGNALS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bgroup\s+by\b|\border\s+by\b|\bjoin\b|\bdistinct\b|\bhaving\b|\bunion\b|\b(count|sum|avg|min|max)\s*\(",
    )
    .expect("valid expensive-signal regex")
});

static MUTATING_VERBS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(insert|update|delete|merge|upsert|truncate|drop|alter|create)\b")
        .expect("valid mutation regex")
});

static RECENCY_FUNCTIONS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bnow\s*\(|\bcurrent_(timestamp|date|time)\b|\blocaltimestamp\b|\brandom\s*\(|\binterval\b",
    )
    .expect("valid recency regex")
});

static TIMESTAMP_COMPARISON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b\w*(_at|_time|_date|timestamp)\s*(<|>|<=|>=|between\b)")
        .expect("valid timestamp comparison regex")
});

/// Whether `text` reads stable data expensive enough to be worth caching.
pub fn should_cache(text: &str) -> bool {
    if is_volatile(text) {
        return false;
    }
    EXPENSIVE_SIGNALS.is_match(text)
}

fn is_volatile(text: &str) -> bool {
    MUTATING_VERBS.is_match(text)
        || RECENCY_FUNCTIONS.is_match(text)
        || TIMESTAMP_COMPARISON.is_match(text)
}

/// Lowercase and collapse whitespace so formatting never changes the key.
///
/// Quoted literals and identifiers (`'...'`, `"..."`) are copied verbatim:
/// `'Bob'` and `'bob'` select different rows and must not share a key.
pub fn normalize_query(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    let mut pending_space = false;

    for c in text.chars() {
        match quote {
            Some(open) => {
                normalized.push(c);
                if c == open {
                    quote = None;
                }
            }
            None if c.is_whitespace() => pending_space = !normalized.is_empty(),
            None => {
                if pending_space {
                    normalized.push(' ');
                    pending_space = false;
                }
                if c == '\'' || c == '"' {
                    quote = Some(c);
                    normalized.push(c);
                } else {
                    normalized.extend(c.to_lowercase());
                }
            }
        }
    }
    normalized
}

/// Cache key: hash of the normalized text and hash of the sorted parameters.
pub fn query_cache_key(text: &str, params: &QueryParams) -> String {
    let normalized = normalize_query(text);
    let serialized = serde_json::to_string(params).unwrap_or_default();
    format!(
        "{}:{}",
        hex_digest_prefix(normalized.as_bytes(), KEY_HASH_LEN),
        hex_digest_prefix(serialized.as_bytes(), KEY_HASH_LEN)
    )
}

/// Counters for the query cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizerStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: u64,
}

impl OptimizerStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct CachedResult {
    value: Value,
    normalized_text: String,
    cached_at: Instant,
}

#[derive(Debug, Default)]
struct QueryCacheState {
    entries: HashMap<String, CachedResult>,
    insertion_order: VecDeque<String>,
}

impl QueryCacheState {
    fn remove(&mut self, key: &str) -> Option<CachedResult> {
        let removed = self.entries.remove(key)?;
        self.insertion_order.retain(|k| k != key);
        Some(removed)
    }
}

/// Bounded FIFO cache of query results with a fixed TTL window.
#[derive(Debug)]
pub struct QueryOptimizer {
    ttl: Duration,
    capacity: NonZeroUsize,
    state: Mutex<QueryCacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl QueryOptimizer {
    /// Create an optimizer cache.
    ///
    /// # Errors
    ///
    /// Returns a config error for a zero TTL or zero capacity.
    pub fn new(ttl: Duration, capacity: usize) -> TesseraResult<Self> {
        if ttl.is_zero() {
            return Err(TesseraError::Config(ConfigError::InvalidValue {
                field: "optimizer_ttl".to_string(),
                value: "0".to_string(),
                reason: "must be greater than 0".to_string(),
            }));
        }
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            TesseraError::Config(ConfigError::InvalidValue {
                field: "optimizer_capacity".to_string(),
                value: capacity.to_string(),
                reason: "must be greater than 0".to_string(),
            })
        })?;

        Ok(Self {
            ttl,
            capacity,
            state: Mutex::new(QueryCacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        })
    }

    pub fn from_config(config: &TesseraConfig) -> TesseraResult<Self> {
        Self::new(config.optimizer_ttl, config.optimizer_capacity)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    // Every critical section completes its mutation before it can panic, so
    // a poisoned guard still holds a consistent map.
    fn lock_state(&self) -> MutexGuard<'_, QueryCacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// See [`should_cache`].
    pub fn should_cache(&self, text: &str) -> bool {
        should_cache(text)
    }

    /// Cached result for `(text, params)`, or `None` on miss or expiry.
    pub fn get_cached_result(&self, text: &str, params: &QueryParams) -> Option<Value> {
        let key = query_cache_key(text, params);
        let now = Instant::now();
        let mut state = self.lock_state();

        let expired = state
            .entries
            .get(&key)
            .map(|entry| now.duration_since(entry.cached_at) >= self.ttl);

        let Some(expired) = expired else {
            drop(state);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if expired {
            state.remove(&key);
            drop(state);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "query cache entry expired");
            return None;
        }

        let value = state.entries.get(&key).map(|entry| entry.value.clone());
        drop(state);
        self.hits.fetch_add(1, Ordering::Relaxed);
        value
    }

    /// Store a result stamped with the current time.
    ///
    /// Re-caching a key replaces it and moves it to the back of the queue.
    pub fn cache_result(&self, text: &str, params: &QueryParams, value: Value) {
        let key = query_cache_key(text, params);
        let entry = CachedResult {
            value,
            normalized_text: normalize_query(text),
            cached_at: Instant::now(),
        };

        let mut evicted = 0u64;
        {
            let mut state = self.lock_state();
            state.remove(&key);
            while state.entries.len() >= self.capacity.get() {
                let Some(oldest) = state.insertion_order.pop_front() else {
                    break;
                };
                state.entries.remove(&oldest);
                evicted += 1;
            }
            state.insertion_order.push_back(key.clone());
            state.entries.insert(key, entry);
        }

        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
            debug!(evicted, "query cache evicted oldest entries");
        }
    }

    /// Read-through execution of a read query.
    ///
    /// Ineligible queries always run `exec`. A cached value that doesn't
    /// decode as `T` is discarded and recomputed.
    pub async fn execute_cached<T, E, F, Fut>(
        &self,
        text: &str,
        params: &QueryParams,
        exec: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !should_cache(text) {
            return exec().await;
        }

        if let Some(cached) = self.get_cached_result(text, params) {
            match serde_json::from_value(cached) {
                Ok(decoded) => return Ok(decoded),
                Err(err) => warn!(error = %err, "discarding undecodable query cache entry"),
            }
        }

        let result = exec().await?;
        match serde_json::to_value(&result) {
            Ok(encoded) => self.cache_result(text, params, encoded),
            Err(err) => warn!(error = %err, "query result not cacheable"),
        }
        Ok(result)
    }

    /// Drop every entry whose normalized text contains `substring`.
    pub fn invalidate_matching(&self, substring: &str) -> usize {
        let needle = normalize_query(substring);
        let mut state = self.lock_state();
        let doomed: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.normalized_text.contains(&needle))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            state.remove(key);
        }
        doomed.len()
    }

    pub fn clear(&self) {
        let mut state = self.lock_state();
        state.entries.clear();
        state.insertion_order.clear();
    }

    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> OptimizerStats {
        OptimizerStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entries: self.len() as u64,
        }
    }
}
