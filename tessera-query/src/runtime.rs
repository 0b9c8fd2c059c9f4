//! Composition root wiring the cache, optimizer, advisor and profiler.
//!
//! One [`QueryRuntime`] is built at process start and its `Arc` handles are
//! passed to whoever needs them. There is no global instance.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tessera_cache::{CacheLayer, CacheStats, LayerStats};
use tessera_core::{HealthCheck, TesseraConfig, TesseraResult, Timestamp};
use tracing::{debug, info, warn};

use crate::advisor::{IndexAdvisor, IndexRecommendation, QueryKind};
use crate::optimizer::{OptimizerStats, QueryOptimizer, QueryParams};
use crate::profiler::{OptimizationSuggestion, PerformanceReport, QueryProfiler};

/// What a query reads, for profiling and index advice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub text: String,
    pub kind: QueryKind,
    pub table: Option<String>,
    pub columns: Vec<String>,
}

impl QueryDescriptor {
    /// Describe `text`; the kind comes from its first keyword.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            kind: QueryKind::of_statement(&text),
            text,
            table: None,
            columns: Vec::new(),
        }
    }

    pub fn with_kind(mut self, kind: QueryKind) -> Self {
        self.kind = kind;
        self
    }

    /// Table and filtered columns fed to the index advisor.
    pub fn accessing<I, S>(mut self, table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.table = Some(table.into());
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }
}

/// Everything an operational surface polls for, in one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeReport {
    pub generated_at: Timestamp,
    pub performance: PerformanceReport,
    pub index_recommendations: Vec<IndexRecommendation>,
    pub suggestions: Vec<OptimizationSuggestion>,
    pub cache: LayerStats,
    pub backend: Option<CacheStats>,
    pub optimizer: OptimizerStats,
    pub health: HealthCheck,
}

pub struct QueryRuntime {
    config: TesseraConfig,
    cache: Arc<CacheLayer>,
    optimizer: Arc<QueryOptimizer>,
    advisor: Arc<IndexAdvisor>,
    profiler: Arc<QueryProfiler>,
}

impl std::fmt::Debug for QueryRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRuntime")
            .field("cache", &self.cache)
            .field("optimizer", &self.optimizer.stats())
            .field("patterns", &self.advisor.pattern_count())
            .finish()
    }
}

impl QueryRuntime {
    /// Build every component from one validated configuration.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error. A remote backend does not
    /// connect here, so an unreachable server is not an error yet.
    pub fn from_config(config: &TesseraConfig) -> TesseraResult<Self> {
        config.validate()?;
        let cache = Arc::new(CacheLayer::from_config(config)?);
        Self::with_cache_layer(config, cache)
    }

    /// Build around an existing cache facade, e.g. one shared with other
    /// subsystems.
    pub fn with_cache_layer(config: &TesseraConfig, cache: Arc<CacheLayer>) -> TesseraResult<Self> {
        config.validate()?;
        let optimizer = Arc::new(QueryOptimizer::from_config(config)?);
        let advisor = Arc::new(IndexAdvisor::from_config(config));
        let profiler = Arc::new(QueryProfiler::from_config(config));

        info!(
            backend = cache.backend().name(),
            capacity = config.capacity,
            optimizer_capacity = config.optimizer_capacity,
            "query runtime initialized"
        );

        Ok(Self {
            config: config.clone(),
            cache,
            optimizer,
            advisor,
            profiler,
        })
    }

    pub fn config(&self) -> &TesseraConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    pub fn optimizer(&self) -> &Arc<QueryOptimizer> {
        &self.optimizer
    }

    pub fn advisor(&self) -> &Arc<IndexAdvisor> {
        &self.advisor
    }

    pub fn profiler(&self) -> &Arc<QueryProfiler> {
        &self.profiler
    }

    /// Execute a query through the optimizer cache.
    ///
    /// A cached result short-circuits `exec` and is not profiled. Otherwise
    /// the execution is timed, profiled, recorded as an access pattern and,
    /// if eligible, cached. A failed execution records nothing.
    pub async fn execute<T, E, F, Fut>(
        &self,
        query: &QueryDescriptor,
        params: &QueryParams,
        exec: F,
    ) -> Result<Vec<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<T>, E>>,
    {
        let eligible = self.optimizer.should_cache(&query.text);

        if eligible {
            if let Some(cached) = self.optimizer.get_cached_result(&query.text, params) {
                match serde_json::from_value(cached) {
                    Ok(rows) => {
                        debug!(kind = %query.kind, "query served from cache");
                        return Ok(rows);
                    }
                    Err(err) => warn!(error = %err, "discarding undecodable query cache entry"),
                }
            }
        }

        let started = Instant::now();
        let rows = exec().await?;
        let elapsed = started.elapsed();

        self.profiler
            .profile_query(&query.text, elapsed, rows.len() as u64);

        if let Some(table) = &query.table {
            // Rejected shapes are logged by the advisor; the query result stands.
            let _ = self
                .advisor
                .record_query_pattern(table, &query.columns, query.kind, 1);
        }

        if eligible {
            match serde_json::to_value(&rows) {
                Ok(encoded) => self.optimizer.cache_result(&query.text, params, encoded),
                Err(err) => warn!(error = %err, "query result not cacheable"),
            }
        }

        Ok(rows)
    }

    /// Combined operational report.
    pub async fn report(&self) -> RuntimeReport {
        RuntimeReport {
            generated_at: chrono::Utc::now(),
            performance: self.profiler.get_performance_report(),
            index_recommendations: self.advisor.recommendations(),
            suggestions: self.profiler.get_optimization_suggestions(),
            cache: self.cache.stats(),
            backend: self.cache.backend_stats().await,
            optimizer: self.optimizer.stats(),
            health: self.cache.health().await,
        }
    }
}
