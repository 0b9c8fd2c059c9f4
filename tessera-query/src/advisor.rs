//! Index recommendations from observed access patterns.
//!
//! The advisor only counts `(table, columns)` shapes and ranks them. It never
//! touches the store itself: [`IndexAdvisor::apply_recommendations`] hands each
//! recommendation to an [`IndexExecutor`] and keeps going past failures.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tessera_core::{IndexError, RecommendationError, TesseraConfig, Timestamp};
use tracing::{info, warn};

/// Column-name fragments that suggest free-text search.
const TEXT_COLUMN_SIGNALS: [&str; 4] = ["name", "title", "content", "description"];

/// Postgres truncates identifiers beyond this length.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Kind of statement that produced an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

impl QueryKind {
    /// Classify by the leading keyword; unknown words map to `Other`.
    pub fn parse(word: &str) -> Self {
        match word.trim().to_ascii_lowercase().as_str() {
            "select" => Self::Select,
            "insert" => Self::Insert,
            "update" => Self::Update,
            "delete" => Self::Delete,
            _ => Self::Other,
        }
    }

    /// Classify a full statement by its first word.
    pub fn of_statement(text: &str) -> Self {
        text.split_whitespace().next().map(Self::parse).unwrap_or(Self::Other)
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Storage index flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    /// Ordered index for equality and range lookups.
    #[serde(rename = "btree")]
    BTree,
    /// Trigram text-search index.
    FullText,
}

impl IndexType {
    pub fn access_method(&self) -> &'static str {
        match self {
            Self::BTree => "btree",
            Self::FullText => "gin",
        }
    }
}

/// Coarse estimate of what an index would buy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Benefit {
    Minimal,
    Low,
    Medium,
    High,
}

impl Benefit {
    fn estimate(frequency: u64, column_count: usize) -> Self {
        if frequency > 50 {
            Self::High
        } else if frequency > 20 && column_count <= 2 {
            Self::Medium
        } else if frequency > 10 {
            Self::Low
        } else {
            Self::Minimal
        }
    }
}

/// Accumulated accesses for one `(table, sorted columns)` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessPattern {
    pub table: String,
    pub columns: Vec<String>,
    pub frequency: u64,
    pub query_kinds: BTreeMap<QueryKind, u64>,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
}

/// A ranked suggestion derived from an [`AccessPattern`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecommendation {
    pub table: String,
    pub columns: Vec<String>,
    pub frequency: u64,
    pub index_type: IndexType,
    pub priority: u64,
    pub estimated_benefit: Benefit,
}

impl IndexRecommendation {
    /// Derive a recommendation. `columns` must already be sorted and non-empty.
    pub fn from_pattern(pattern: &AccessPattern) -> Self {
        let column_count = pattern.columns.len();
        let index_type = if pattern.columns.iter().any(|c| is_text_column(c)) {
            IndexType::FullText
        } else {
            IndexType::BTree
        };

        Self {
            table: pattern.table.clone(),
            columns: pattern.columns.clone(),
            frequency: pattern.frequency,
            index_type,
            priority: priority(pattern.frequency, column_count),
            estimated_benefit: Benefit::estimate(pattern.frequency, column_count),
        }
    }

    /// Deterministic index name, `idx_<table>_<col>_<col>...`.
    pub fn index_name(&self) -> String {
        let raw = format!("idx_{}_{}", self.table, self.columns.join("_"));
        let mut name: String = raw
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        name.truncate(MAX_IDENTIFIER_LEN);
        name
    }

    /// `CREATE INDEX` DDL for this recommendation.
    pub fn create_statement(&self) -> String {
        let columns = match self.index_type {
            IndexType::BTree => self
                .columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            IndexType::FullText => self
                .columns
                .iter()
                .map(|c| format!("{} gin_trgm_ops", quote_ident(c)))
                .collect::<Vec<_>>()
                .join(", "),
        };
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} USING {} ({})",
            quote_ident(&self.index_name()),
            quote_ident(&self.table),
            self.index_type.access_method(),
            columns
        )
    }
}

/// `frequency * 10 - (columns - 1) * 2`, never below 1.
fn priority(frequency: u64, column_count: usize) -> u64 {
    let width_penalty = (column_count.saturating_sub(1) as u64).saturating_mul(2);
    frequency
        .saturating_mul(10)
        .saturating_sub(width_penalty)
        .max(1)
}

fn is_text_column(column: &str) -> bool {
    let lowered = column.to_ascii_lowercase();
    TEXT_COLUMN_SIGNALS.iter().any(|signal| lowered.contains(signal))
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Creates the storage structure behind a recommendation.
#[async_trait]
pub trait IndexExecutor: Send + Sync {
    async fn create_index(&self, recommendation: &IndexRecommendation) -> Result<(), IndexError>;
}

/// One recommendation that could not be applied.
#[derive(Debug)]
pub struct IndexFailure {
    pub recommendation: IndexRecommendation,
    pub error: IndexError,
}

/// Outcome of [`IndexAdvisor::apply_recommendations`].
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Names of indexes created.
    pub created: Vec<String>,
    pub failed: Vec<IndexFailure>,
}

impl ApplyReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

type PatternKey = (String, Vec<String>);

/// Access-pattern recorder and index recommender.
#[derive(Debug)]
pub struct IndexAdvisor {
    patterns: Mutex<HashMap<PatternKey, AccessPattern>>,
    min_frequency: u64,
}

impl Default for IndexAdvisor {
    fn default() -> Self {
        Self::new(tessera_core::DEFAULT_MIN_RECOMMENDATION_FREQUENCY)
    }
}

impl IndexAdvisor {
    /// Create an advisor whose [`recommendations`](Self::recommendations)
    /// threshold is `min_frequency`.
    pub fn new(min_frequency: u64) -> Self {
        Self {
            patterns: Mutex::new(HashMap::new()),
            min_frequency,
        }
    }

    pub fn from_config(config: &TesseraConfig) -> Self {
        Self::new(config.min_recommendation_frequency)
    }

    pub fn min_frequency(&self) -> u64 {
        self.min_frequency
    }

    fn lock_patterns(&self) -> MutexGuard<'_, HashMap<PatternKey, AccessPattern>> {
        self.patterns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `frequency` accesses of `columns` on `table`.
    ///
    /// Column order and duplicates don't matter. Blank column names are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Rejects an empty table, an empty column set or a zero frequency;
    /// nothing is recorded in that case.
    pub fn record_query_pattern<I, S>(
        &self,
        table: &str,
        columns: I,
        kind: QueryKind,
        frequency: u64,
    ) -> Result<(), RecommendationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let table = table.trim();
        if table.is_empty() {
            return Err(reject("table", "table name is empty"));
        }

        let mut columns: Vec<String> = columns
            .into_iter()
            .map(|c| c.as_ref().trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        columns.sort();
        columns.dedup();
        if columns.is_empty() {
            return Err(reject("columns", "column set is empty"));
        }
        if frequency == 0 {
            return Err(reject("frequency", "frequency must be at least 1"));
        }

        let now = Utc::now();
        let mut patterns = self.lock_patterns();
        let pattern = patterns
            .entry((table.to_string(), columns.clone()))
            .or_insert_with(|| AccessPattern {
                table: table.to_string(),
                columns,
                frequency: 0,
                query_kinds: BTreeMap::new(),
                first_seen: now,
                last_seen: now,
            });
        pattern.frequency = pattern.frequency.saturating_add(frequency);
        *pattern.query_kinds.entry(kind).or_insert(0) += frequency;
        pattern.last_seen = now;
        Ok(())
    }

    /// Recommendations for patterns seen at least `min_frequency` times,
    /// highest priority first.
    pub fn get_index_recommendations(&self, min_frequency: u64) -> Vec<IndexRecommendation> {
        let mut recommendations: Vec<IndexRecommendation> = self
            .lock_patterns()
            .values()
            .filter(|p| p.frequency >= min_frequency)
            .map(IndexRecommendation::from_pattern)
            .collect();

        recommendations.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.table.cmp(&b.table))
                .then_with(|| a.columns.cmp(&b.columns))
        });
        recommendations
    }

    /// Recommendations at the configured threshold.
    pub fn recommendations(&self) -> Vec<IndexRecommendation> {
        self.get_index_recommendations(self.min_frequency)
    }

    /// Apply each recommendation independently; failures are collected.
    pub async fn apply_recommendations(
        &self,
        recommendations: &[IndexRecommendation],
        executor: &dyn IndexExecutor,
    ) -> ApplyReport {
        let mut report = ApplyReport::default();
        for recommendation in recommendations {
            let index_name = recommendation.index_name();
            match executor.create_index(recommendation).await {
                Ok(()) => {
                    info!(index = %index_name, table = %recommendation.table, "index created");
                    report.created.push(index_name);
                }
                Err(error) => {
                    warn!(index = %index_name, error = %error, "index creation failed");
                    report.failed.push(IndexFailure {
                        recommendation: recommendation.clone(),
                        error,
                    });
                }
            }
        }
        report
    }

    pub fn pattern_count(&self) -> usize {
        self.lock_patterns().len()
    }

    /// Snapshot of every recorded pattern, sorted by table then columns.
    pub fn patterns(&self) -> Vec<AccessPattern> {
        let mut patterns: Vec<AccessPattern> = self.lock_patterns().values().cloned().collect();
        patterns.sort_by(|a, b| (&a.table, &a.columns).cmp(&(&b.table, &b.columns)));
        patterns
    }
}

fn reject(field: &str, reason: &str) -> RecommendationError {
    warn!(field, reason, "rejected access pattern");
    RecommendationError::InvalidInput {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
