//! Job handlers, one per operation kind.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use glimmer_core::{Error, JobRecord, OperationKind};

/// Context provided to job handlers.
pub struct JobContext {
    /// The claimed job, as stored when it was claimed.
    pub job: JobRecord,
}

impl JobContext {
    pub fn new(job: JobRecord) -> Self {
        Self { job }
    }

    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    pub fn payload(&self) -> &JsonValue {
        &self.job.payload
    }

    /// 1-based number of the attempt being executed.
    pub fn attempt(&self) -> i32 {
        self.job.attempts
    }

    pub fn is_last_attempt(&self) -> bool {
        !self.job.has_attempts_left()
    }
}

/// Result of job execution.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    /// Job completed successfully with optional result data.
    Success(Option<JsonValue>),
    /// Job can never succeed (undecodable payload, no handler); no further
    /// attempts.
    Failed(String),
    /// Job failed; retry with backoff while attempts remain.
    Retry(String),
    /// The provider throttled the job; retry no sooner than it asked.
    RateLimited {
        error: String,
        retry_after: Option<Duration>,
    },
}

impl JobResult {
    /// Classify an error raised while running a job.
    ///
    /// Every error spends an attempt; only throttling changes the delay.
    pub fn from_error(error: &Error) -> Self {
        if error.is_rate_limited() {
            JobResult::RateLimited {
                error: error.to_string(),
                retry_after: error.retry_after(),
            }
        } else {
            JobResult::Retry(error.to_string())
        }
    }
}

/// Trait for job handlers.
///
/// Jobs are delivered at least once, so `execute` must be safe to repeat for
/// the same job id.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The operation kind this handler processes.
    fn kind(&self) -> OperationKind;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;
}
