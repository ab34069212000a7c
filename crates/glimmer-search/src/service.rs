//! Natural-language product search.
//!
//! translate → validate → confidence threshold → execute with timeout.
//! Whenever a step does not produce rows, the fixed fallback listing runs
//! instead and the reason is recorded on the outcome. Callers always get an
//! outcome, never an error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};

use glimmer_cache::ResultCache;
use glimmer_core::{defaults, Error, QueryExecutor, Result};
use glimmer_inference::RetryingInvoker;

use crate::allowlist::{fallback_listing_sql, SchemaAllowlist};
use crate::translator::{QueryMetadata, QueryTranslator, Translation};
use crate::validator::{QueryValidator, RejectionRule};

/// Allowance over `query_timeout` before the service gives up on an executor
/// that did not enforce the timeout itself.
const EXECUTOR_TIMEOUT_GRACE: Duration = Duration::from_secs(1);

/// Search configuration.
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `SEARCH_CONFIDENCE_THRESHOLD` | `0.6` | Minimum model confidence to run a generated query |
/// | `SEARCH_QUERY_TIMEOUT_MS` | `5000` | Statement timeout |
/// | `SEARCH_MAX_ROWS` | `50` | Row limit appended to or clamped on every query |
/// | `SEARCH_MAX_QUERY_CHARS` | `500` | Longer queries are truncated |
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    pub confidence_threshold: f64,
    pub query_timeout: Duration,
    pub max_rows: u64,
    pub max_query_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: defaults::SEARCH_CONFIDENCE_THRESHOLD,
            query_timeout: Duration::from_millis(defaults::SEARCH_QUERY_TIMEOUT_MS),
            max_rows: defaults::SEARCH_MAX_ROWS,
            max_query_chars: defaults::SEARCH_MAX_QUERY_CHARS,
        }
    }
}

impl SearchConfig {
    pub fn from_env() -> Self {
        use glimmer_core::env_or;
        Self {
            confidence_threshold: env_or(
                "SEARCH_CONFIDENCE_THRESHOLD",
                defaults::SEARCH_CONFIDENCE_THRESHOLD,
            ),
            query_timeout: Duration::from_millis(env_or(
                "SEARCH_QUERY_TIMEOUT_MS",
                defaults::SEARCH_QUERY_TIMEOUT_MS,
            )),
            max_rows: env_or("SEARCH_MAX_ROWS", defaults::SEARCH_MAX_ROWS),
            max_query_chars: env_or("SEARCH_MAX_QUERY_CHARS", defaults::SEARCH_MAX_QUERY_CHARS),
        }
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_max_rows(mut self, max_rows: u64) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_max_query_chars(mut self, max_chars: usize) -> Self {
        self.max_query_chars = max_chars;
        self
    }
}

/// Where the rows of an outcome came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    /// The validated, model-generated query.
    Generated,
    /// The fixed fallback listing.
    Fallback,
}

/// Why the fallback listing was served.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackReason {
    EmptyQuery,
    ModelUnavailable { error: String },
    Rejected { rule: RejectionRule, reason: String },
    LowConfidence { confidence: f64, threshold: f64 },
    ExecutionFailed { error: String },
    Timeout,
}

/// Result of [`SearchService::search`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    /// The query as searched, after whitespace cleanup and truncation.
    pub query: String,
    pub rows: Vec<JsonValue>,
    pub source: SearchSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    /// The statement that produced `rows`.
    pub sql: String,
    pub confidence: f64,
    pub metadata: QueryMetadata,
    /// True when even the fallback listing failed and `rows` is empty.
    pub degraded: bool,
    pub duration_ms: u64,
}

/// Snapshot of search counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    pub searches: u64,
    pub generated: u64,
    pub fallbacks: u64,
    pub rejected: u64,
    pub low_confidence: u64,
    pub model_unavailable: u64,
    pub execution_errors: u64,
    pub timeouts: u64,
}

#[derive(Default)]
struct Counters {
    searches: AtomicU64,
    generated: AtomicU64,
    fallbacks: AtomicU64,
    rejected: AtomicU64,
    low_confidence: AtomicU64,
    model_unavailable: AtomicU64,
    execution_errors: AtomicU64,
    timeouts: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record(&self, reason: &FallbackReason) {
        Self::bump(&self.fallbacks);
        match reason {
            FallbackReason::EmptyQuery => {}
            FallbackReason::ModelUnavailable { .. } => Self::bump(&self.model_unavailable),
            FallbackReason::Rejected { .. } => Self::bump(&self.rejected),
            FallbackReason::LowConfidence { .. } => Self::bump(&self.low_confidence),
            FallbackReason::ExecutionFailed { .. } => Self::bump(&self.execution_errors),
            FallbackReason::Timeout => Self::bump(&self.timeouts),
        }
    }

    fn snapshot(&self) -> SearchStats {
        SearchStats {
            searches: self.searches.load(Ordering::Relaxed),
            generated: self.generated.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            low_confidence: self.low_confidence.load(Ordering::Relaxed),
            model_unavailable: self.model_unavailable.load(Ordering::Relaxed),
            execution_errors: self.execution_errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Search over the product catalog with AI-generated, validated SQL.
#[derive(Clone)]
pub struct SearchService {
    translator: QueryTranslator,
    validator: QueryValidator,
    executor: Arc<dyn QueryExecutor>,
    config: SearchConfig,
    counters: Arc<Counters>,
}

impl SearchService {
    pub fn new(
        invoker: RetryingInvoker,
        executor: Arc<dyn QueryExecutor>,
        allowlist: Arc<SchemaAllowlist>,
        config: SearchConfig,
    ) -> Self {
        Self {
            translator: QueryTranslator::new(invoker, allowlist.clone(), config.max_rows),
            validator: QueryValidator::new(allowlist, config.max_rows),
            executor,
            config,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Cache translations of repeated queries.
    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.translator = self.translator.with_cache(cache);
        self
    }

    pub fn translator(&self) -> &QueryTranslator {
        &self.translator
    }

    pub fn validator(&self) -> &QueryValidator {
        &self.validator
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn stats(&self) -> SearchStats {
        self.counters.snapshot()
    }

    /// Search for `query`, optionally tailored to a shopper segment.
    pub async fn search(&self, query: &str, segment_hint: Option<&str>) -> SearchOutcome {
        let started = Instant::now();
        Counters::bump(&self.counters.searches);

        let query = clean_query(query, self.config.max_query_chars);
        if query.is_empty() {
            return self
                .fallback(query, FallbackReason::EmptyQuery, None, started)
                .await;
        }

        let translation = self.translator.translate(&query, segment_hint).await;
        if translation.degraded {
            let error = translation.error.clone().unwrap_or_default();
            return self
                .fallback(
                    query,
                    FallbackReason::ModelUnavailable { error },
                    Some(&translation),
                    started,
                )
                .await;
        }

        let plan = match self.validator.validate(&translation) {
            Ok(plan) => plan,
            Err(rejection) => {
                warn!(
                    subsystem = "search",
                    component = "service",
                    op = "validate",
                    rule = %rejection.rule,
                    reason = %rejection.reason,
                    candidate = translation.sql.as_deref().unwrap_or(""),
                    "Generated query rejected, serving fallback listing"
                );
                let reason = FallbackReason::Rejected {
                    rule: rejection.rule,
                    reason: rejection.reason,
                };
                return self
                    .fallback(query, reason, Some(&translation), started)
                    .await;
            }
        };

        if plan.confidence < self.config.confidence_threshold {
            warn!(
                subsystem = "search",
                component = "service",
                confidence = plan.confidence,
                threshold = self.config.confidence_threshold,
                "Generated query below confidence threshold, serving fallback listing"
            );
            let reason = FallbackReason::LowConfidence {
                confidence: plan.confidence,
                threshold: self.config.confidence_threshold,
            };
            return self
                .fallback(query, reason, Some(&translation), started)
                .await;
        }

        match self.execute(&plan.sql).await {
            Ok(rows) => {
                Counters::bump(&self.counters.generated);
                let duration_ms = started.elapsed().as_millis() as u64;
                info!(
                    subsystem = "search",
                    component = "service",
                    op = "search",
                    result_count = rows.len(),
                    confidence = plan.confidence,
                    duration_ms,
                    "Search served from generated query"
                );
                SearchOutcome {
                    query,
                    rows,
                    source: SearchSource::Generated,
                    fallback_reason: None,
                    sql: plan.sql,
                    confidence: plan.confidence,
                    metadata: plan.metadata,
                    degraded: false,
                    duration_ms,
                }
            }
            Err(e) => {
                warn!(
                    subsystem = "search",
                    component = "service",
                    op = "execute",
                    error = %e,
                    "Generated query failed, serving fallback listing"
                );
                let reason = match e {
                    Error::Timeout(_) => FallbackReason::Timeout,
                    other => FallbackReason::ExecutionFailed {
                        error: other.to_string(),
                    },
                };
                self.fallback(query, reason, Some(&translation), started)
                    .await
            }
        }
    }

    async fn execute(&self, sql: &str) -> Result<Vec<JsonValue>> {
        let timeout = self.config.query_timeout;
        let guard = timeout + EXECUTOR_TIMEOUT_GRACE;
        match tokio::time::timeout(guard, self.executor.execute(sql, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "Query exceeded {}ms",
                timeout.as_millis()
            ))),
        }
    }

    async fn fallback(
        &self,
        query: String,
        reason: FallbackReason,
        translation: Option<&Translation>,
        started: Instant,
    ) -> SearchOutcome {
        self.counters.record(&reason);

        let sql = fallback_listing_sql(self.config.max_rows);
        let (rows, degraded) = match self.execute(&sql).await {
            Ok(rows) => (rows, false),
            Err(e) => {
                error!(
                    subsystem = "search",
                    component = "service",
                    op = "fallback",
                    error = %e,
                    "Fallback listing failed, returning no rows"
                );
                (Vec::new(), true)
            }
        };

        SearchOutcome {
            query,
            rows,
            source: SearchSource::Fallback,
            fallback_reason: Some(reason),
            sql,
            confidence: translation.map_or(0.0, |t| t.confidence),
            metadata: translation.map(|t| t.metadata.clone()).unwrap_or_default(),
            degraded,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Collapse whitespace and cut to at most `max_chars` characters.
fn clean_query(query: &str, max_chars: usize) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_chars)
        .collect::<String>()
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_query_collapses_whitespace() {
        assert_eq!(clean_query("  gentle \n cleanser\t", 100), "gentle cleanser");
    }

    #[test]
    fn test_clean_query_truncates_on_char_boundary() {
        assert_eq!(clean_query("crème hydratante", 4), "crèm");
        assert_eq!(clean_query("a b", 2), "a");
    }

    #[test]
    fn test_config_builders() {
        let config = SearchConfig::default()
            .with_confidence_threshold(0.8)
            .with_max_rows(10)
            .with_query_timeout(Duration::from_millis(250));
        assert_eq!(config.confidence_threshold, 0.8);
        assert_eq!(config.max_rows, 10);
        assert_eq!(config.query_timeout, Duration::from_millis(250));
        assert_eq!(config.max_query_chars, defaults::SEARCH_MAX_QUERY_CHARS);
    }

    #[test]
    fn test_fallback_reason_serialization() {
        let value = serde_json::to_value(FallbackReason::Rejected {
            rule: RejectionRule::ForbiddenConstruct,
            reason: "statement separator followed by more input".to_string(),
        })
        .unwrap();
        assert_eq!(value["kind"], "rejected");
        assert_eq!(value["rule"], "forbidden_construct");
    }
}
