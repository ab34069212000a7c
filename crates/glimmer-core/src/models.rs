//! Domain models shared across glimmer crates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// =============================================================================
// OPERATION KINDS
// =============================================================================

/// Named category of AI-backed computation.
///
/// Selects TTL, fallback payload and (for queued work) the job handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum OperationKind {
    /// Skin profile analysis from questionnaire answers.
    SkinAnalysis,
    /// Vision analysis of an uploaded face photo.
    PhotoAnalysis,
    /// Product recommendation for a profile.
    ProductRecommendation,
    /// Skincare routine generation.
    RoutineGeneration,
    /// Natural-language search translated into SQL.
    QueryGeneration,
    /// Any kind not known to this build.
    Other(String),
}

impl OperationKind {
    /// Stable string form used in keys, database rows and logs.
    pub fn as_str(&self) -> &str {
        match self {
            OperationKind::SkinAnalysis => "skin_analysis",
            OperationKind::PhotoAnalysis => "photo_analysis",
            OperationKind::ProductRecommendation => "product_recommendation",
            OperationKind::RoutineGeneration => "routine_generation",
            OperationKind::QueryGeneration => "query_generation",
            OperationKind::Other(name) => name,
        }
    }

    /// Parse a stored kind name. Unknown names map to `Other`.
    pub fn parse(s: &str) -> Self {
        match s {
            "skin_analysis" => OperationKind::SkinAnalysis,
            "photo_analysis" => OperationKind::PhotoAnalysis,
            "product_recommendation" => OperationKind::ProductRecommendation,
            "routine_generation" => OperationKind::RoutineGeneration,
            "query_generation" => OperationKind::QueryGeneration,
            other => OperationKind::Other(other.to_string()),
        }
    }

    /// All kinds known to this build.
    pub fn known() -> [OperationKind; 5] {
        [
            OperationKind::SkinAnalysis,
            OperationKind::PhotoAnalysis,
            OperationKind::ProductRecommendation,
            OperationKind::RoutineGeneration,
            OperationKind::QueryGeneration,
        ]
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(OperationKind::parse(s))
    }
}

impl From<String> for OperationKind {
    fn from(s: String) -> Self {
        OperationKind::parse(&s)
    }
}

impl From<OperationKind> for String {
    fn from(kind: OperationKind) -> Self {
        kind.as_str().to_string()
    }
}

// =============================================================================
// DEGRADED RESULTS
// =============================================================================

/// Marker field set on payloads produced after the resilience layer gave up.
pub const FALLBACK_FIELD: &str = "fallback";

/// Marker field set on payloads wrapping unparseable model output.
pub const PARSE_ERROR_FIELD: &str = "parse_error";

/// Whether a payload is a fallback produced instead of a real result.
pub fn is_degraded(payload: &JsonValue) -> bool {
    payload
        .get(FALLBACK_FIELD)
        .and_then(JsonValue::as_bool)
        .unwrap_or(false)
}

// =============================================================================
// AI REQUESTS
// =============================================================================

/// Inline image attached to a generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Prompt (and optional images) sent to the generative-AI endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub images: Vec<ImageInput>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            images: Vec::new(),
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_image(mut self, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        self.images.push(ImageInput {
            mime_type: mime_type.into(),
            data,
        });
        self
    }

    /// Whether the request needs a vision-capable model.
    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }
}

// =============================================================================
// CACHE
// =============================================================================

/// A stored AI result, partitioned by subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub subject_id: String,
    pub operation_kind: OperationKind,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_count: i64,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// An entry is live strictly before its expiry instant.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

// =============================================================================
// JOBS
// =============================================================================

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Delayed => "delayed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(JobState::Waiting),
            "active" => Some(JobState::Active),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            "delayed" => Some(JobState::Delayed),
            _ => None,
        }
    }

    /// Completed and failed jobs never change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authoritative job record owned by the queue store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub kind: OperationKind,
    pub payload: JsonValue,
    pub state: JobState,
    /// Attempts started so far (incremented on every claim).
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub result: Option<JsonValue>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Earliest time the job may be claimed.
    pub run_at: DateTime<Utc>,
}

impl JobRecord {
    /// Whether another attempt is allowed after the current one.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// State as reported to callers: a delayed job that is due again counts
    /// as `waiting`.
    pub fn state_at(&self, now: DateTime<Utc>) -> JobState {
        match self.state {
            JobState::Delayed if self.run_at <= now => JobState::Waiting,
            state => state,
        }
    }
}

/// A job to be inserted by `JobStore::enqueue`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub kind: OperationKind,
    pub payload: JsonValue,
    pub max_attempts: i32,
    pub run_at: DateTime<Utc>,
}

/// Per-state job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
    pub delayed: i64,
}

impl JobCounts {
    /// Add one job in `state` to the counts.
    pub fn record(&mut self, state: JobState) {
        match state {
            JobState::Waiting => self.waiting += 1,
            JobState::Active => self.active += 1,
            JobState::Completed => self.completed += 1,
            JobState::Failed => self.failed += 1,
            JobState::Delayed => self.delayed += 1,
        }
    }

    pub fn total(&self) -> i64 {
        self.waiting + self.active + self.completed + self.failed + self.delayed
    }
}
