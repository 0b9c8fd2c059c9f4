//! Per-query timing statistics and slow-query log.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tessera_core::{hex_digest_prefix, truncate_chars, TesseraConfig, Timestamp};
use tracing::{debug, warn};

/// Characters of query text kept with each statistic.
pub const QUERY_PREVIEW_CHARS: usize = 200;

const QUERY_HASH_LEN: usize = 16;
const REPORT_TOP_N: usize = 10;
const SLOW_REPORT_WINDOW_HOURS: i64 = 24;

const INDEX_MIN_COUNT: u64 = 10;
const REWRITE_MIN_AVG_SECS: f64 = 1.0;
const LIMIT_MIN_AVG_ROWS: f64 = 1000.0;

static FILTER_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bwhere\b").expect("valid filter clause regex"));

/// Bucket hash for a query text.
pub fn query_hash(text: &str) -> String {
    hex_digest_prefix(text.as_bytes(), QUERY_HASH_LEN)
}

/// Running statistics for one distinct query. Times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryStat {
    pub query_hash: String,
    pub query_text: String,
    pub total_time: f64,
    pub count: u64,
    pub avg_time: f64,
    pub min_time: f64,
    pub max_time: f64,
    pub total_results: u64,
    pub last_seen: Timestamp,
}

impl QueryStat {
    fn new(query_hash: String, text: &str) -> Self {
        Self {
            query_hash,
            query_text: truncate_chars(text, QUERY_PREVIEW_CHARS).to_string(),
            total_time: 0.0,
            count: 0,
            avg_time: 0.0,
            min_time: f64::INFINITY,
            max_time: 0.0,
            total_results: 0,
            last_seen: Utc::now(),
        }
    }

    fn observe(&mut self, seconds: f64, result_count: u64) {
        self.count += 1;
        self.total_time += seconds;
        self.avg_time = self.total_time / self.count as f64;
        self.min_time = self.min_time.min(seconds);
        self.max_time = self.max_time.max(seconds);
        self.total_results = self.total_results.saturating_add(result_count);
        self.last_seen = Utc::now();
    }

    pub fn avg_results(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_results as f64 / self.count as f64
        }
    }
}

/// A single execution that crossed the slow threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowQueryRecord {
    pub query_text: String,
    pub execution_time: f64,
    pub result_count: u64,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportOverview {
    pub total_queries: u64,
    pub unique_queries: usize,
    pub slow_queries: usize,
    pub total_time: f64,
    pub avg_time: f64,
    pub slow_query_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub generated_at: Timestamp,
    pub overview: ReportOverview,
    /// Highest average time first.
    pub slowest_queries: Vec<QueryStat>,
    /// Highest execution count first.
    pub most_frequent_queries: Vec<QueryStat>,
    /// Slow executions from the last 24 hours, oldest first.
    pub recent_slow_queries: Vec<SlowQueryRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuggestionKind {
    Index,
    Rewrite,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSuggestion {
    pub kind: SuggestionKind,
    pub priority: Priority,
    pub query_hash: String,
    pub query_text: String,
    pub message: String,
}

/// Timing profiler shared by every executing task.
///
/// Statistics and the slow log sit behind separate locks, each held only for
/// the mutation itself.
#[derive(Debug)]
pub struct QueryProfiler {
    slow_threshold: Duration,
    slow_log_capacity: usize,
    stats: Mutex<HashMap<String, QueryStat>>,
    slow_log: Mutex<VecDeque<SlowQueryRecord>>,
}

impl Default for QueryProfiler {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(tessera_core::config::DEFAULT_SLOW_QUERY_THRESHOLD_MS),
            tessera_core::DEFAULT_SLOW_LOG_CAPACITY,
        )
    }
}

impl QueryProfiler {
    /// Executions strictly slower than `slow_threshold` go to the slow log,
    /// which keeps the most recent `slow_log_capacity` records.
    pub fn new(slow_threshold: Duration, slow_log_capacity: usize) -> Self {
        Self {
            slow_threshold,
            slow_log_capacity: slow_log_capacity.max(1),
            stats: Mutex::new(HashMap::new()),
            slow_log: Mutex::new(VecDeque::with_capacity(slow_log_capacity.max(1))),
        }
    }

    pub fn from_config(config: &TesseraConfig) -> Self {
        Self::new(config.slow_query_threshold, config.slow_log_capacity)
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    fn lock_stats(&self) -> MutexGuard<'_, HashMap<String, QueryStat>> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_slow_log(&self) -> MutexGuard<'_, VecDeque<SlowQueryRecord>> {
        self.slow_log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one execution of `text`.
    pub fn profile_query(&self, text: &str, execution_time: Duration, result_count: u64) {
        let seconds = execution_time.as_secs_f64();
        let hash = query_hash(text);

        self.lock_stats()
            .entry(hash.clone())
            .or_insert_with(|| QueryStat::new(hash.clone(), text))
            .observe(seconds, result_count);

        if execution_time > self.slow_threshold {
            let record = SlowQueryRecord {
                query_text: text.to_string(),
                execution_time: seconds,
                result_count,
                timestamp: Utc::now(),
            };
            {
                let mut log = self.lock_slow_log();
                if log.len() >= self.slow_log_capacity {
                    log.pop_front();
                }
                log.push_back(record);
            }
            warn!(
                query_hash = %hash,
                execution_secs = seconds,
                result_count,
                "slow query"
            );
        } else {
            debug!(query_hash = %hash, execution_secs = seconds, "query profiled");
        }
    }

    pub fn stats_for(&self, text: &str) -> Option<QueryStat> {
        self.lock_stats().get(&query_hash(text)).cloned()
    }

    pub fn all_stats(&self) -> Vec<QueryStat> {
        self.lock_stats().values().cloned().collect()
    }

    /// Slow log contents, oldest first.
    pub fn slow_queries(&self) -> Vec<SlowQueryRecord> {
        self.lock_slow_log().iter().cloned().collect()
    }

    pub fn reset(&self) {
        self.lock_stats().clear();
        self.lock_slow_log().clear();
    }

    pub fn get_performance_report(&self) -> PerformanceReport {
        let stats = self.all_stats();
        let slow = self.slow_queries();

        let total_queries: u64 = stats.iter().map(|s| s.count).sum();
        let total_time: f64 = stats.iter().map(|s| s.total_time).sum();
        let avg_time = if total_queries == 0 {
            0.0
        } else {
            total_time / total_queries as f64
        };

        let mut slowest = stats.clone();
        slowest.sort_by(|a, b| {
            b.avg_time
                .partial_cmp(&a.avg_time)
                .unwrap_or(CmpOrdering::Equal)
                .then_with(|| a.query_hash.cmp(&b.query_hash))
        });
        slowest.truncate(REPORT_TOP_N);

        let mut frequent = stats.clone();
        frequent.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.query_hash.cmp(&b.query_hash))
        });
        frequent.truncate(REPORT_TOP_N);

        let cutoff = Utc::now() - chrono::Duration::hours(SLOW_REPORT_WINDOW_HOURS);
        let recent_slow: Vec<SlowQueryRecord> = slow
            .iter()
            .filter(|record| record.timestamp >= cutoff)
            .cloned()
            .collect();

        PerformanceReport {
            generated_at: Utc::now(),
            overview: ReportOverview {
                total_queries,
                unique_queries: stats.len(),
                slow_queries: slow.len(),
                total_time,
                avg_time,
                slow_query_threshold: self.slow_threshold.as_secs_f64(),
            },
            slowest_queries: slowest,
            most_frequent_queries: frequent,
            recent_slow_queries: recent_slow,
        }
    }

    /// Suggestions for every tracked query, highest priority first.
    pub fn get_optimization_suggestions(&self) -> Vec<OptimizationSuggestion> {
        let mut suggestions = Vec::new();

        for stat in self.all_stats() {
            if stat.count > INDEX_MIN_COUNT && FILTER_CLAUSE.is_match(&stat.query_text) {
                suggestions.push(suggest(
                    &stat,
                    SuggestionKind::Index,
                    Priority::High,
                    format!(
                        "Executed {} times with a filter clause; index the filtered columns",
                        stat.count
                    ),
                ));
            }
            if stat.avg_time > REWRITE_MIN_AVG_SECS {
                suggestions.push(suggest(
                    &stat,
                    SuggestionKind::Rewrite,
                    Priority::Medium,
                    format!(
                        "Average execution time {:.3}s; consider rewriting the query",
                        stat.avg_time
                    ),
                ));
            }
            if stat.avg_results() > LIMIT_MIN_AVG_ROWS {
                suggestions.push(suggest(
                    &stat,
                    SuggestionKind::Limit,
                    Priority::Low,
                    format!(
                        "Returns {:.0} rows on average; add a LIMIT or paginate",
                        stat.avg_results()
                    ),
                ));
            }
        }

        suggestions.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.query_hash.cmp(&b.query_hash))
        });
        suggestions
    }
}

fn suggest(
    stat: &QueryStat,
    kind: SuggestionKind,
    priority: Priority,
    message: String,
) -> OptimizationSuggestion {
    OptimizationSuggestion {
        kind,
        priority,
        query_hash: stat.query_hash.clone(),
        query_text: stat.query_text.clone(),
        message,
    }
}
