//! Redis-backed cache implementation.
//!
//! Values are stored as JSON strings under `"<namespace>:<key>"`. The
//! connection is opened lazily on first use and shared by every caller; a
//! per-call timeout bounds each round trip, handshake included.
//!
//! # Failure Handling
//!
//! Any connectivity, timeout or serialization fault is returned as
//! [`CacheError::BackendUnavailable`] from the call that hit it. Nothing is
//! retried here. A connection-level fault drops the shared connection so the
//! next call performs one fresh handshake.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, IntoConnectionInfo, RedisError};
use tessera_core::{CacheError, RemoteBackendConfig};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::traits::{effective_ttl, CacheBackend, CacheResult, CacheStats, CacheValue};

const BACKEND_NAME: &str = "redis";

/// Keys deleted per DEL round trip during pattern invalidation.
const DELETE_BATCH: usize = 500;

/// Longest expiry sent to the server, about 2200 years. Larger TTLs are
/// clamped so the server-side absolute deadline cannot overflow.
const MAX_EXPIRE_MILLIS: u64 = 1 << 46;

/// The shared connection plus the handshake that produced it.
#[derive(Clone)]
struct Lease {
    generation: u64,
    conn: MultiplexedConnection,
}

/// Remote cache backend over a shared Redis connection.
///
/// # Example
///
/// ```ignore
/// let backend = RedisBackend::new(&RemoteBackendConfig::default())?;
/// backend.set("report:daily", json!({"rows": 12}), Some(Duration::from_secs(60))).await?;
/// ```
pub struct RedisBackend {
    client: redis::Client,
    /// Guards the handshake so concurrent first users open one connection.
    connection: Mutex<Option<Lease>>,
    generations: AtomicU64,
    namespace: String,
    op_timeout: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RedisBackend {
    /// Build a backend from connection settings. No I/O happens here.
    ///
    /// # Errors
    ///
    /// Returns `BackendUnavailable` if the URL cannot be parsed.
    pub fn new(config: &RemoteBackendConfig) -> CacheResult<Self> {
        let mut info = config
            .url
            .as_str()
            .into_connection_info()
            .map_err(|e| CacheError::unavailable(BACKEND_NAME, e))?;
        if let Some(username) = &config.username {
            info.redis.username = Some(username.clone());
        }
        if let Some(password) = &config.password {
            info.redis.password = Some(password.clone());
        }

        let client =
            redis::Client::open(info).map_err(|e| CacheError::unavailable(BACKEND_NAME, e))?;

        info!(
            namespace = %config.namespace,
            timeout_ms = config.op_timeout.as_millis() as u64,
            "redis cache backend configured"
        );

        Ok(Self {
            client,
            connection: Mutex::new(None),
            generations: AtomicU64::new(0),
            namespace: config.namespace.clone(),
            op_timeout: config.op_timeout,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Namespace every key lives under.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    /// SCAN pattern matching every namespaced key containing `substring`.
    fn match_pattern(&self, substring: &str) -> String {
        format!(
            "{}:*{}*",
            escape_glob(&self.namespace),
            escape_glob(substring)
        )
    }

    /// Shared connection, opened on first use.
    async fn connection(&self) -> CacheResult<Lease> {
        let mut slot = self.connection.lock().await;
        if let Some(lease) = slot.as_ref() {
            return Ok(lease.clone());
        }

        debug!("opening redis connection");
        let conn = tokio::time::timeout(
            self.op_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| CacheError::unavailable(BACKEND_NAME, "connection handshake timed out"))?
        .map_err(|e| CacheError::unavailable(BACKEND_NAME, e))?;

        let lease = Lease {
            generation: self.generations.fetch_add(1, Ordering::Relaxed) + 1,
            conn,
        };
        *slot = Some(lease.clone());
        Ok(lease)
    }

    /// Forget the shared connection, unless another caller already replaced
    /// the one that failed.
    async fn discard(&self, generation: u64) {
        let mut slot = self.connection.lock().await;
        if is_current(slot.as_ref().map(|lease| lease.generation), generation) {
            debug!(generation, "dropping failed redis connection");
            slot.take();
        }
    }

    /// Run one remote operation under the per-call timeout.
    async fn run<T, F>(&self, op: &'static str, generation: u64, fut: F) -> CacheResult<T>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
                    self.discard(generation).await;
                }
                warn!(op, error = %e, "redis operation failed");
                Err(CacheError::unavailable(BACKEND_NAME, e))
            }
            Err(_) => {
                warn!(op, timeout_ms = self.op_timeout.as_millis() as u64, "redis operation timed out");
                Err(CacheError::unavailable(
                    BACKEND_NAME,
                    format!("{} timed out after {:?}", op, self.op_timeout),
                ))
            }
        }
    }

    /// Collect namespaced keys matching a SCAN glob, one cursor page per call.
    async fn scan_keys(&self, pattern: String) -> CacheResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor = 0u64;
        loop {
            let Lease { generation, mut conn } = self.connection().await?;
            let page_pattern = pattern.clone();
            let (next, page): (u64, Vec<String>) = self
                .run("scan", generation, async move {
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(page_pattern)
                        .arg("COUNT")
                        .arg(DELETE_BATCH)
                        .query_async(&mut conn)
                        .await
                })
                .await?;
            keys.extend(page);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may report a key more than once.
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    /// Delete keys in batches; returns how many existed.
    async fn delete_keys(&self, keys: &[String]) -> CacheResult<u64> {
        let mut removed = 0u64;
        for chunk in keys.chunks(DELETE_BATCH) {
            let Lease { generation, mut conn } = self.connection().await?;
            let batch = chunk.to_vec();
            removed += self
                .run("del", generation, async move { conn.del::<_, u64>(batch).await })
                .await?;
        }
        Ok(removed)
    }
}

/// Whether the connection that failed under `failed` is still the shared one.
fn is_current(shared: Option<u64>, failed: u64) -> bool {
    shared == Some(failed)
}

/// PSETEX argument for `ttl`: sub-millisecond TTLs round up so they still
/// expire, oversized ones are clamped to [`MAX_EXPIRE_MILLIS`].
pub(crate) fn expire_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis())
        .unwrap_or(u64::MAX)
        .clamp(1, MAX_EXPIRE_MILLIS)
}

/// Escape Redis glob metacharacters so `text` matches literally.
pub(crate) fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\' | '^') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn get(&self, key: &str) -> CacheResult<Option<CacheValue>> {
        let Lease { generation, mut conn } = self.connection().await?;
        let full_key = self.namespaced(key);
        let raw: Option<String> = self
            .run("get", generation, async move { conn.get(full_key).await })
            .await?;

        match raw {
            Some(payload) => {
                let value = serde_json::from_str(&payload)
                    .map_err(|e| CacheError::unavailable(BACKEND_NAME, e))?;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
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
        let payload =
            serde_json::to_string(&value).map_err(|e| CacheError::unavailable(BACKEND_NAME, e))?;
        let Lease { generation, mut conn } = self.connection().await?;
        let full_key = self.namespaced(key);

        match effective_ttl(ttl) {
            Some(ttl) => {
                let millis = expire_millis(ttl);
                self.run("pset_ex", generation, async move {
                    conn.pset_ex::<_, _, ()>(full_key, payload, millis).await
                })
                .await?;
            }
            None => {
                self.run("set", generation, async move {
                    conn.set::<_, _, ()>(full_key, payload).await
                })
                .await?;
            }
        }
        Ok(true)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let Lease { generation, mut conn } = self.connection().await?;
        let full_key = self.namespaced(key);
        let removed: u64 = self
            .run("del", generation, async move { conn.del(full_key).await })
            .await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let Lease { generation, mut conn } = self.connection().await?;
        let full_key = self.namespaced(key);
        self.run("exists", generation, async move { conn.exists(full_key).await })
            .await
    }

    async fn clear(&self) -> CacheResult<bool> {
        let keys = self
            .scan_keys(format!("{}:*", escape_glob(&self.namespace)))
            .await?;
        let removed = self.delete_keys(&keys).await?;
        debug!(removed, namespace = %self.namespace, "cleared redis namespace");
        Ok(true)
    }

    async fn clear_pattern(&self, substring: &str) -> CacheResult<u64> {
        let keys = self.scan_keys(self.match_pattern(substring)).await?;
        self.delete_keys(&keys).await
    }

    async fn ping(&self) -> CacheResult<()> {
        let Lease { generation, mut conn } = self.connection().await?;
        let _pong: String = self
            .run("ping", generation, async move { redis::cmd("PING").query_async(&mut conn).await })
            .await?;
        Ok(())
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ..CacheStats::default()
        })
    }
}
