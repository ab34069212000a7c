//! Structured logging schema and field name constants for glimmer.
//!
//! All crates use these names for structured logging fields so log
//! aggregation can query by the same field across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "api", "inference", "cache", "jobs", "search", "database", "storage"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "limiter", "invoker", "result_cache", "worker", "validator"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "acquire", "invoke", "get_or_generate", "claim_next"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Subject (user) the operation is partitioned by.
pub const SUBJECT_ID: &str = "subject_id";

/// Operation kind of an AI-backed computation.
pub const OPERATION_KIND: &str = "operation_kind";

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Cache key (hex digest).
pub const CACHE_KEY: &str = "cache_key";

/// Natural-language search query.
pub const QUERY: &str = "query";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Attempt number within a retry loop (1-based).
pub const ATTEMPT: &str = "attempt";

/// Delay before the next attempt, in milliseconds.
pub const DELAY_MS: &str = "delay_ms";

/// Number of rows returned by a query.
pub const RESULT_COUNT: &str = "result_count";

/// Byte length of a prompt.
pub const PROMPT_LEN: &str = "prompt_len";

/// Byte length of a model response.
pub const RESPONSE_LEN: &str = "response_len";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for inference.
pub const MODEL: &str = "model";

/// Confidence reported by the model.
pub const CONFIDENCE: &str = "confidence";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Whether a degraded/fallback result was produced.
pub const DEGRADED: &str = "degraded";

/// Reason a generated query was rejected.
pub const REJECTION: &str = "rejection";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_are_unique() {
        let fields = [
            SUBSYSTEM, COMPONENT, OPERATION, SUBJECT_ID, OPERATION_KIND, JOB_ID, CACHE_KEY, QUERY,
            DURATION_MS, ATTEMPT, DELAY_MS, RESULT_COUNT, PROMPT_LEN, RESPONSE_LEN, MODEL,
            CONFIDENCE, SUCCESS, ERROR_MSG, DEGRADED, REJECTION,
        ];
        let unique: std::collections::HashSet<_> = fields.iter().collect();
        assert_eq!(unique.len(), fields.len());
    }
}
