//! In-memory stores.
//!
//! Same contracts as the PostgreSQL stores, held in process memory. Used by
//! tests across the workspace and by local runs without a database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use glimmer_core::{
    new_v7, AnalysisSink, CacheEntry, CacheStore, Clock, Error, JobCounts, JobRecord, JobState,
    JobStore, NewJob, ObjectStore, OperationKind, QueryExecutor, Result, SystemClock,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// CACHE
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw entry regardless of expiry, without touching access metadata.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        lock(&self.entries).get(key).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    pub fn count_for_subject(&self, subject_id: &str) -> usize {
        lock(&self.entries)
            .values()
            .filter(|e| e.subject_id == subject_id)
            .count()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(
        &self,
        key: &str,
        subject_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>> {
        let mut entries = lock(&self.entries);
        match entries.get_mut(key) {
            Some(entry) if entry.subject_id == subject_id && entry.is_live(now) => {
                entry.access_count += 1;
                entry.last_accessed_at = Some(now);
                Ok(Some(entry.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn upsert(&self, entry: CacheEntry) -> Result<()> {
        lock(&self.entries).insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete_for_subject(
        &self,
        subject_id: &str,
        kind: Option<&OperationKind>,
    ) -> Result<u64> {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|_, e| {
            !(e.subject_id == subject_id && kind.map_or(true, |k| &e.operation_kind == k))
        });
        Ok((before - entries.len()) as u64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        Ok((before - entries.len()) as u64)
    }
}

// =============================================================================
// JOBS
// =============================================================================

pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, JobRecord>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `clock` for enqueue timestamps.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Snapshot of every job, oldest first.
    pub fn jobs(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = lock(&self.jobs).values().cloned().collect();
        jobs.sort_by_key(|j| (j.enqueued_at, j.id));
        jobs
    }

    /// Apply `f` to an active job, or fail with `JobNotFound`.
    fn update_active<F>(&self, job_id: Uuid, f: F) -> Result<()>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut jobs = lock(&self.jobs);
        match jobs.get_mut(&job_id) {
            Some(job) if job.state == JobState::Active => {
                f(job);
                Ok(())
            }
            _ => Err(Error::JobNotFound(job_id)),
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<JobRecord> {
        let now = self.clock.now();
        let record = JobRecord {
            id: new_v7(),
            kind: job.kind,
            payload: job.payload,
            state: if job.run_at > now {
                JobState::Delayed
            } else {
                JobState::Waiting
            },
            attempts: 0,
            max_attempts: job.max_attempts.max(1),
            last_error: None,
            result: None,
            enqueued_at: now,
            started_at: None,
            completed_at: None,
            run_at: job.run_at,
        };
        lock(&self.jobs).insert(record.id, record.clone());
        Ok(record)
    }

    async fn claim_next(
        &self,
        kinds: &[OperationKind],
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>> {
        let mut jobs = lock(&self.jobs);
        let next = jobs
            .values()
            .filter(|j| matches!(j.state, JobState::Waiting | JobState::Delayed))
            .filter(|j| j.run_at <= now)
            .filter(|j| kinds.is_empty() || kinds.contains(&j.kind))
            .min_by_key(|j| (j.run_at, j.enqueued_at, j.id))
            .map(|j| j.id);

        Ok(next.and_then(|id| jobs.get_mut(&id)).map(|job| {
            job.state = JobState::Active;
            job.started_at = Some(now);
            job.attempts += 1;
            job.clone()
        }))
    }

    async fn complete(
        &self,
        job_id: Uuid,
        result: Option<JsonValue>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.update_active(job_id, |job| {
            job.state = JobState::Completed;
            job.result = result;
            job.completed_at = Some(now);
            job.last_error = None;
        })
    }

    async fn reschedule(&self, job_id: Uuid, error: &str, run_at: DateTime<Utc>) -> Result<()> {
        self.update_active(job_id, |job| {
            job.state = JobState::Delayed;
            job.last_error = Some(error.to_string());
            job.run_at = run_at;
        })
    }

    async fn fail(&self, job_id: Uuid, error: &str, now: DateTime<Utc>) -> Result<()> {
        self.update_active(job_id, |job| {
            job.state = JobState::Failed;
            job.last_error = Some(error.to_string());
            job.completed_at = Some(now);
        })
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        Ok(lock(&self.jobs).get(&job_id).cloned())
    }

    async fn counts(&self, now: DateTime<Utc>) -> Result<JobCounts> {
        let mut counts = JobCounts::default();
        for job in lock(&self.jobs).values() {
            counts.record(job.state_at(now));
        }
        Ok(counts)
    }

    async fn requeue_stalled(&self, started_before: DateTime<Utc>) -> Result<u64> {
        let mut requeued = 0;
        for job in lock(&self.jobs).values_mut() {
            if job.state == JobState::Active && job.started_at.is_some_and(|s| s < started_before)
            {
                job.state = JobState::Waiting;
                job.started_at = None;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn purge_terminal(&self, finished_before: DateTime<Utc>) -> Result<u64> {
        let mut jobs = lock(&self.jobs);
        let before = jobs.len();
        jobs.retain(|_, j| {
            !(j.state.is_terminal() && j.completed_at.is_some_and(|c| c < finished_before))
        });
        Ok((before - jobs.len()) as u64)
    }
}

// =============================================================================
// ANALYSES / OBJECTS
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryAnalysisSink {
    analyses: Mutex<HashMap<(String, String, String), JsonValue>>,
}

impl MemoryAnalysisSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, subject_id: &str, photo_key: &str, kind: &OperationKind) -> Option<JsonValue> {
        lock(&self.analyses)
            .get(&(
                subject_id.to_string(),
                photo_key.to_string(),
                kind.as_str().to_string(),
            ))
            .cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.analyses).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.analyses).is_empty()
    }
}

#[async_trait]
impl AnalysisSink for MemoryAnalysisSink {
    async fn upsert_analysis(
        &self,
        subject_id: &str,
        photo_key: &str,
        kind: &OperationKind,
        payload: &JsonValue,
    ) -> Result<()> {
        lock(&self.analyses).insert(
            (
                subject_id.to_string(),
                photo_key.to_string(),
                kind.as_str().to_string(),
            ),
            payload.clone(),
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, data: Vec<u8>) {
        lock(&self.objects).insert(key.into(), data);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>> {
        lock(&self.objects)
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("object {}", key)))
    }
}

// =============================================================================
// QUERY EXECUTION
// =============================================================================

/// Query executor returning canned rows and recording every statement.
#[derive(Debug, Default)]
pub struct RecordingQueryExecutor {
    rows: Vec<JsonValue>,
    failure: Option<String>,
    latency: Option<Duration>,
    statements: Mutex<Vec<String>>,
}

impl RecordingQueryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `rows` for every statement.
    pub fn with_rows(mut self, rows: Vec<JsonValue>) -> Self {
        self.rows = rows;
        self
    }

    /// Fail every statement with a query error.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Take `latency` to answer; exceeding the caller's timeout is a timeout error.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Statements executed so far.
    pub fn statements(&self) -> Vec<String> {
        lock(&self.statements).clone()
    }
}

#[async_trait]
impl QueryExecutor for RecordingQueryExecutor {
    async fn execute(&self, sql: &str, timeout: Duration) -> Result<Vec<JsonValue>> {
        lock(&self.statements).push(sql.to_string());

        if let Some(latency) = self.latency {
            if latency > timeout {
                tokio::time::sleep(timeout).await;
                return Err(Error::Timeout(format!(
                    "Query exceeded {}ms",
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(latency).await;
        }

        match &self.failure {
            Some(message) => Err(Error::Query(message.clone())),
            None => Ok(self.rows.clone()),
        }
    }
}
