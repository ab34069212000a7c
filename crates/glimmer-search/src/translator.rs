//! Natural-language search to candidate SQL.
//!
//! The model gets a description of the allowlisted schema and must answer
//! with a fenced ```sql block and a fenced ```json metadata block. Nothing
//! the translator returns is trusted: the candidate still has to pass
//! [`QueryValidator`](crate::validator::QueryValidator).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};

use glimmer_cache::ResultCache;
use glimmer_core::{defaults, Error, GenerationRequest, OperationKind};
use glimmer_inference::{extract_fenced, AiPayload, Invocation, RetryingInvoker};

use crate::allowlist::SchemaAllowlist;

/// Cache partition for translations. They depend only on the query text, so
/// every user shares them.
pub const SEARCH_CACHE_SUBJECT: &str = "search";

/// What the model recognised in the query besides the SQL itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMetadata {
    /// Skin concerns the query asks about (e.g. "acne", "dryness").
    #[serde(default)]
    pub concerns: Vec<String>,
    /// Terms the user wants excluded (e.g. "fragrance").
    #[serde(default)]
    pub excluded: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_max: Option<f64>,
}

/// Output of [`QueryTranslator::translate`].
///
/// Serializes to the same shape as the `query_generation` fallback payload,
/// so degraded translations are recognised (and skipped) by the result cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    /// Candidate statement, unvalidated.
    pub sql: Option<String>,
    #[serde(flatten)]
    pub metadata: QueryMetadata,
    /// Model-reported confidence in 0.0..=1.0.
    #[serde(default)]
    pub confidence: f64,
    /// Set when the model could not be reached.
    #[serde(rename = "fallback", default)]
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Translation {
    /// A translation standing in for an unreachable model.
    pub fn degraded(error: impl Into<String>) -> Self {
        Self {
            degraded: true,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Interpret an invocation of the `query_generation` kind.
    pub fn from_invocation(invocation: Invocation) -> Self {
        let raw_text = invocation.raw_text;
        match invocation.payload {
            AiPayload::Fallback { error, .. } => Self::degraded(error),
            AiPayload::Structured(value) => {
                let answer = ModelAnswer::from_json(value);
                let sql = raw_text
                    .as_deref()
                    .and_then(|text| extract_fenced(text, "sql"))
                    .or(answer.sql);
                Self {
                    sql,
                    metadata: QueryMetadata {
                        concerns: answer.concerns,
                        excluded: answer.excluded,
                        price_min: answer.price_min,
                        price_max: answer.price_max,
                    },
                    confidence: answer.confidence.unwrap_or(0.0).clamp(0.0, 1.0),
                    degraded: false,
                    error: None,
                }
            }
            AiPayload::Raw { text, .. } => Self {
                sql: extract_fenced(&text, "sql"),
                confidence: defaults::RAW_RESPONSE_CONFIDENCE,
                ..Default::default()
            },
        }
    }
}

/// Metadata block as the model writes it. Every field is optional.
#[derive(Debug, Default, Deserialize)]
struct ModelAnswer {
    #[serde(default)]
    sql: Option<String>,
    #[serde(default)]
    concerns: Vec<String>,
    #[serde(default)]
    excluded: Vec<String>,
    #[serde(default)]
    price_min: Option<f64>,
    #[serde(default)]
    price_max: Option<f64>,
    #[serde(default)]
    confidence: Option<f64>,
}

impl ModelAnswer {
    fn from_json(value: JsonValue) -> Self {
        serde_json::from_value(value).unwrap_or_else(|e| {
            debug!(
                subsystem = "search",
                component = "translator",
                error = %e,
                "Metadata block has an unexpected shape, ignoring it"
            );
            Self::default()
        })
    }
}

/// Turns free-text queries into candidate SQL through the retrying invoker.
#[derive(Clone)]
pub struct QueryTranslator {
    invoker: RetryingInvoker,
    allowlist: Arc<SchemaAllowlist>,
    max_rows: u64,
    cache: Option<ResultCache>,
}

impl QueryTranslator {
    pub fn new(invoker: RetryingInvoker, allowlist: Arc<SchemaAllowlist>, max_rows: u64) -> Self {
        Self {
            invoker,
            allowlist,
            max_rows,
            cache: None,
        }
    }

    /// Reuse translations of identical queries through `cache`.
    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Build the generation request for `query`.
    pub fn request(&self, query: &str, segment_hint: Option<&str>) -> GenerationRequest {
        let system = format!(
            "You translate beauty product searches into one read-only PostgreSQL SELECT \
             statement.\n\
             Tables and columns you may use:\n{}\
             Rules: name every column explicitly (no *), qualify columns with table aliases, \
             no comments, no semicolons, no CTEs or subqueries in FROM, at most {} rows. \
             products.skin_types and products.concerns are text arrays; \
             products.attributes is jsonb.\n\
             Answer with a ```sql block containing the statement, then a ```json block with \
             the fields concerns (array of strings), excluded (array of strings), price_min \
             (number or null), price_max (number or null) and confidence (0.0 to 1.0).",
            self.allowlist.describe(),
            self.max_rows
        );
        let prompt = match segment_hint {
            Some(segment) => format!("Search: {}\nShopper segment: {}", query, segment),
            None => format!("Search: {}", query),
        };
        GenerationRequest::new(prompt).with_system(system)
    }

    /// Translate `query`. Never fails; an unreachable model yields a degraded
    /// translation without SQL.
    pub async fn translate(&self, query: &str, segment_hint: Option<&str>) -> Translation {
        let Some(cache) = &self.cache else {
            return self.translate_uncached(query, segment_hint).await;
        };

        let input = json!({ "query": query, "segment": segment_hint });
        let lookup = cache
            .get_or_generate(
                SEARCH_CACHE_SUBJECT,
                &OperationKind::QueryGeneration,
                &input,
                || async {
                    let translation = self.translate_uncached(query, segment_hint).await;
                    Ok::<_, Error>(serde_json::to_value(translation)?)
                },
            )
            .await;

        match lookup.and_then(|l| Ok(serde_json::from_value::<Translation>(l.payload)?)) {
            Ok(translation) => translation,
            Err(e) => {
                warn!(
                    subsystem = "search",
                    component = "translator",
                    op = "translate",
                    error = %e,
                    "Cached translation unusable, translating directly"
                );
                self.translate_uncached(query, segment_hint).await
            }
        }
    }

    async fn translate_uncached(&self, query: &str, segment_hint: Option<&str>) -> Translation {
        let request = self.request(query, segment_hint);
        let invocation = self
            .invoker
            .invoke(&OperationKind::QueryGeneration, &request)
            .await;
        let attempts = invocation.attempts;
        let translation = Translation::from_invocation(invocation);
        debug!(
            subsystem = "search",
            component = "translator",
            op = "translate",
            attempt = attempts,
            has_sql = translation.sql.is_some(),
            confidence = translation.confidence,
            degraded = translation.degraded,
            "Query translated"
        );
        translation
    }
}
