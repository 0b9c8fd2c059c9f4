//! Storage substrates for the cache facade.
//!
//! Two variants implement [`CacheBackend`]: [`InMemoryBackend`] for a single
//! process and [`RedisBackend`] when several processes must observe the same
//! invalidations.

pub mod memory;
pub mod remote;
pub mod traits;

use std::sync::Arc;

use tessera_core::{BackendKind, TesseraConfig, TesseraResult};
use tracing::info;

pub use memory::{CacheEntry, InMemoryBackend};
pub use remote::RedisBackend;
pub use traits::{CacheBackend, CacheResult, CacheStats, CacheValue};

/// Build the backend selected by `config.backend`.
///
/// # Errors
///
/// Returns a config error for a zero capacity and a cache error for an
/// unparseable remote URL. No network I/O happens here.
pub fn build_backend(config: &TesseraConfig) -> TesseraResult<Arc<dyn CacheBackend>> {
    let backend: Arc<dyn CacheBackend> = match config.backend {
        BackendKind::InProcess => Arc::new(InMemoryBackend::new(config.capacity)?),
        BackendKind::Remote => Arc::new(RedisBackend::new(&config.remote)?),
    };
    info!(backend = backend.name(), "cache backend selected");
    Ok(backend)
}
