//! Deterministic cache key derivation.
//!
//! A key is `prefix[:arg...][:kwargs-hash]` where:
//! - `prefix` is an explicit name or `"<ConsumerType>.<operation>"`
//! - numeric and string positional arguments appear verbatim, except strings
//!   containing the `:` separator, which are hashed so `"a:b"` and
//!   `"a", "b"` stay distinct
//! - any other positional argument appears as an 8-char content hash
//! - keyword arguments are sorted by name, serialized, and hashed once
//!
//! Keyword order therefore never affects the key.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tessera_core::short_hash;

const SEPARATOR: &str = ":";

/// A derived cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Start a key under an explicit prefix.
    pub fn named(prefix: impl Into<String>) -> CacheKeyBuilder {
        CacheKeyBuilder::new(prefix.into())
    }

    /// Start a key prefixed with `"<Consumer>.<operation>"`.
    ///
    /// `Consumer` contributes its unqualified type name, generics stripped.
    pub fn for_operation<Consumer: ?Sized>(operation: &str) -> CacheKeyBuilder {
        CacheKeyBuilder::new(format!("{}.{}", short_type_name::<Consumer>(), operation))
    }

    /// Wrap an already-derived key string.
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

/// Builder accumulating the parts of a [`CacheKey`].
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    prefix: String,
    args: Vec<String>,
    kwargs: BTreeMap<String, Value>,
}

impl CacheKeyBuilder {
    fn new(prefix: String) -> Self {
        Self {
            prefix,
            args: Vec::new(),
            kwargs: BTreeMap::new(),
        }
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        let value = value.into();
        let part = match &value {
            Value::String(s) if !s.contains(SEPARATOR) => s.clone(),
            Value::Number(n) => n.to_string(),
            other => short_hash(other.to_string().as_bytes()),
        };
        self.args.push(part);
        self
    }

    /// Append any serializable positional argument.
    ///
    /// # Errors
    ///
    /// Fails if `value` cannot be represented as JSON.
    pub fn arg_serialized<T: Serialize + ?Sized>(
        self,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(self.arg(serde_json::to_value(value)?))
    }

    /// Add a keyword argument. Re-adding a name replaces its value.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Derive the key.
    pub fn build(self) -> CacheKey {
        let mut parts = Vec::with_capacity(self.args.len() + 2);
        parts.push(self.prefix);
        parts.extend(self.args);
        if !self.kwargs.is_empty() {
            // BTreeMap serializes in key order, and serde_json objects are
            // sorted maps, so nested objects are order-independent too.
            let serialized = Value::Object(self.kwargs.into_iter().collect()).to_string();
            parts.push(short_hash(serialized.as_bytes()));
        }
        CacheKey(parts.join(SEPARATOR))
    }
}

/// Unqualified type name with generic parameters stripped.
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
