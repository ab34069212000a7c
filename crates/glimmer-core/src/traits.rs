//! Core traits for glimmer's external collaborators.
//!
//! These traits define the seams between the resilience core and the
//! concrete backends (AI endpoint, PostgreSQL, object storage).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{CacheEntry, GenerationRequest, JobCounts, JobRecord, NewJob, OperationKind, Result};

// =============================================================================
// INFERENCE
// =============================================================================

/// Backend for text and vision generation.
///
/// Throttling must be reported as `Error::RateLimited` so the invoker can
/// honour the provider's retry hint.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Send one request and return the model's raw text.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Get the model name used for text-only requests.
    fn model_name(&self) -> &str;

    /// Check if the backend is reachable.
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

// =============================================================================
// CACHE
// =============================================================================

/// Row-oriented backing store for the result cache.
///
/// Every lookup and delete is scoped by subject so one subject can never read
/// or invalidate another subject's entries.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a live entry (`now < expires_at`) and record the access.
    ///
    /// Expired rows are reported as `None` even if they still exist.
    async fn get(&self, key: &str, subject_id: &str, now: DateTime<Utc>)
        -> Result<Option<CacheEntry>>;

    /// Insert or replace the entry for `entry.key`.
    async fn upsert(&self, entry: CacheEntry) -> Result<()>;

    /// Delete the subject's entries, optionally only those of one kind.
    async fn delete_for_subject(
        &self,
        subject_id: &str,
        kind: Option<&OperationKind>,
    ) -> Result<u64>;

    /// Physically remove entries with `expires_at <= now`.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

// =============================================================================
// JOBS
// =============================================================================

/// Durable backing store for the job queue.
///
/// The queue is the only writer; workers report outcomes through it.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job in `waiting` (or `delayed` if `run_at` is in the future).
    async fn enqueue(&self, job: NewJob) -> Result<JobRecord>;

    /// Atomically claim the next runnable job of one of `kinds`.
    ///
    /// Runnable means `waiting`, or `delayed` with `run_at <= now`. The claimed
    /// job becomes `active`, gets `started_at = now` and its attempt counter
    /// is incremented.
    async fn claim_next(
        &self,
        kinds: &[OperationKind],
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>>;

    /// Mark an active job completed.
    async fn complete(
        &self,
        job_id: Uuid,
        result: Option<JsonValue>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Move an active job to `delayed` until `run_at`, recording the error.
    async fn reschedule(&self, job_id: Uuid, error: &str, run_at: DateTime<Utc>) -> Result<()>;

    /// Mark an active job terminally failed, recording the error.
    async fn fail(&self, job_id: Uuid, error: &str, now: DateTime<Utc>) -> Result<()>;

    /// Fetch a job by id.
    async fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>>;

    /// Count jobs per state as of `now`; due delayed jobs count as waiting.
    async fn counts(&self, now: DateTime<Utc>) -> Result<JobCounts>;

    /// Return `active` jobs started before `started_before` to `waiting`.
    async fn requeue_stalled(&self, started_before: DateTime<Utc>) -> Result<u64>;

    /// Delete terminal jobs that finished before `finished_before`.
    async fn purge_terminal(&self, finished_before: DateTime<Utc>) -> Result<u64>;
}

// =============================================================================
// DATASTORE / OBJECT STORE
// =============================================================================

/// Executes validated read-only statements against the relational datastore.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run `sql` and return each row as a JSON object.
    ///
    /// Implementations must abort the statement once `timeout` elapses.
    async fn execute(&self, sql: &str, timeout: Duration) -> Result<Vec<JsonValue>>;
}

/// Read access to uploaded blobs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the bytes stored under `key`.
    async fn fetch(&self, key: &str) -> Result<Vec<u8>>;
}

/// Persistence target for photo analysis results.
///
/// Must be an upsert: jobs are delivered at least once.
#[async_trait]
pub trait AnalysisSink: Send + Sync {
    async fn upsert_analysis(
        &self,
        subject_id: &str,
        photo_key: &str,
        kind: &OperationKind,
        payload: &JsonValue,
    ) -> Result<()>;
}
