//! Tessera Query - Query Optimization Layer
//!
//! - [`QueryOptimizer`]: eligibility heuristic and FIFO result cache
//! - [`IndexAdvisor`]: access-pattern counting and index recommendations
//! - [`QueryProfiler`]: per-query timings, slow log and suggestions
//! - [`QueryRuntime`]: builds all of the above plus the cache facade

pub mod advisor;
pub mod optimizer;
pub mod profiler;
pub mod runtime;

pub use advisor::{
    AccessPattern, ApplyReport, Benefit, IndexAdvisor, IndexExecutor, IndexFailure,
    IndexRecommendation, IndexType, QueryKind,
};
pub use optimizer::{
    normalize_query, query_cache_key, should_cache, OptimizerStats, QueryOptimizer, QueryParams,
};
pub use profiler::{
    query_hash, OptimizationSuggestion, PerformanceReport, Priority, QueryProfiler, QueryStat,
    ReportOverview, SlowQueryRecord, SuggestionKind,
};
pub use runtime::{QueryDescriptor, QueryRuntime, RuntimeReport};
