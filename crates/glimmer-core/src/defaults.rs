//! Centralized default constants for glimmer.
//!
//! **This module is the single source of truth** for shared default values.
//! Every `from_env()` constructor falls back to these constants.
//!
//! Organized by domain area. When adding new constants, place them in the
//! appropriate section.

// =============================================================================
// AI INVOCATION
// =============================================================================

/// Outbound AI calls allowed per rolling window.
pub const AI_MAX_CALLS_PER_MINUTE: u32 = 15;

/// Length of the limiter window in seconds.
pub const AI_LIMIT_WINDOW_SECS: u64 = 60;

/// Attempts per invocation (first call included).
pub const AI_MAX_ATTEMPTS: u32 = 3;

/// Base backoff before the second attempt, in milliseconds.
pub const AI_BASE_BACKOFF_MS: u64 = 2_000;

/// Exponential backoff multiplier.
pub const AI_BACKOFF_MULTIPLIER: u32 = 2;

/// Upper bound for a single backoff sleep, in milliseconds.
pub const AI_MAX_BACKOFF_MS: u64 = 60_000;

/// Jitter ratio applied on top of the computed backoff (0.0 disables).
pub const AI_JITTER_RATIO: f64 = 0.2;

/// Confidence assigned to free-text responses that could not be parsed.
pub const RAW_RESPONSE_CONFIDENCE: f64 = 0.5;

/// Default OpenAI-compatible endpoint.
pub const OPENAI_URL: &str = "https://api.openai.com/v1";

/// Default generation model.
pub const GEN_MODEL: &str = "gpt-4o-mini";

/// Default vision model (used when a request carries images).
pub const VISION_MODEL: &str = "gpt-4o-mini";

/// Timeout for generation requests in seconds.
pub const GEN_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// RESULT CACHE
// =============================================================================

/// TTL for operation kinds without an explicit entry (1 hour).
pub const CACHE_DEFAULT_TTL_SECS: u64 = 3_600;

/// Skin analysis is expensive and stable (7 days).
pub const CACHE_SKIN_ANALYSIS_TTL_SECS: u64 = 7 * 24 * 3_600;

/// Photo analysis results (7 days).
pub const CACHE_PHOTO_ANALYSIS_TTL_SECS: u64 = 7 * 24 * 3_600;

/// Routine generation (1 day).
pub const CACHE_ROUTINE_TTL_SECS: u64 = 24 * 3_600;

/// Product recommendations track catalogue changes (1 hour).
pub const CACHE_RECOMMENDATION_TTL_SECS: u64 = 3_600;

/// Search query translation is cheap and volatile (15 minutes).
pub const CACHE_QUERY_GENERATION_TTL_SECS: u64 = 15 * 60;

/// Interval between expiry sweeps in seconds.
pub const CACHE_SWEEP_INTERVAL_SECS: u64 = 600;

/// Payload fields removed before hashing a cache key.
pub const CACHE_VOLATILE_FIELDS: &[&str] = &[
    "timestamp",
    "created_at",
    "updated_at",
    "requested_at",
    "request_id",
    "nonce",
];

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Worker pool size.
pub const JOB_CONCURRENCY: usize = 2;

/// Jobs started per minute across the whole pool.
pub const JOB_RATE_PER_MINUTE: u32 = 10;

/// Attempts per job before it is marked failed.
pub const JOB_MAX_ATTEMPTS: i32 = 3;

/// Base delay before a failed job is retried, in milliseconds.
pub const JOB_BACKOFF_MS: u64 = 5_000;

/// Cap on the computed job retry delay, in milliseconds (15 minutes).
pub const JOB_MAX_BACKOFF_MS: u64 = 15 * 60_000;

/// Delay applied to a rate-limited job when the provider gave no hint.
pub const JOB_RATE_LIMIT_DELAY_MS: u64 = 60_000;

/// Per-job execution timeout in seconds (5 minutes).
pub const JOB_TIMEOUT_SECS: u64 = 300;

/// Idle poll interval when the queue is empty, in milliseconds.
pub const JOB_POLL_INTERVAL_MS: u64 = 1_000;

/// Time to wait for in-flight jobs during shutdown, in seconds.
pub const JOB_SHUTDOWN_DEADLINE_SECS: u64 = 30;

/// Terminal jobs are purged after this many seconds (1 day).
pub const JOB_RETENTION_SECS: u64 = 24 * 3_600;

/// Interval between retention purges, in seconds.
pub const JOB_PURGE_INTERVAL_SECS: u64 = 600;

/// Active jobs older than this on startup are considered stalled.
pub const JOB_STALL_THRESHOLD_SECS: u64 = 2 * JOB_TIMEOUT_SECS;

/// Worker event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// SEARCH
// =============================================================================

/// Minimum AI confidence required to execute a translated query.
pub const SEARCH_CONFIDENCE_THRESHOLD: f64 = 0.6;

/// Execution timeout for translated queries, in milliseconds.
pub const SEARCH_QUERY_TIMEOUT_MS: u64 = 5_000;

/// Row limit appended to (or clamped on) every executed query.
pub const SEARCH_MAX_ROWS: u64 = 50;

/// Maximum accepted natural-language query length in characters.
pub const SEARCH_MAX_QUERY_CHARS: usize = 500;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Maximum request body size in bytes (16 MB, photo uploads).
pub const MAX_BODY_SIZE_BYTES: usize = 16 * 1024 * 1024;

// =============================================================================
// DATABASE
// =============================================================================

/// Pool size. Workers, search and the cache share it.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Connections kept open while idle.
pub const DB_MIN_CONNECTIONS: u32 = 1;

/// Maximum wait for a pooled connection.
pub const DB_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Idle connections older than this are closed.
pub const DB_IDLE_TIMEOUT_SECS: u64 = 600;

/// Connections are recycled after this long.
pub const DB_MAX_LIFETIME_SECS: u64 = 1_800;
