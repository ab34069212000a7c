//! PostgreSQL implementation of [`JobStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use glimmer_core::{
    new_v7, Error, JobCounts, JobRecord, JobState, JobStore, NewJob, OperationKind, Result,
};

const JOB_COLUMNS: &str = "id, kind, payload, state, attempts, max_attempts, last_error, result, \
                           enqueued_at, started_at, completed_at, run_at";

/// Jobs in the `job_queue` table.
///
/// Claims use `FOR UPDATE SKIP LOCKED`, so any number of workers (in any
/// number of processes) can poll concurrently without double-claiming.
#[derive(Clone)]
pub struct PgJobStore {
    pool: Pool<Postgres>,
}

impl PgJobStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<JobRecord> {
        let state: String = row.get("state");
        let state = JobState::parse(&state)
            .ok_or_else(|| Error::Internal(format!("Unknown job state in database: {}", state)))?;
        Ok(JobRecord {
            id: row.get("id"),
            kind: OperationKind::parse(row.get::<&str, _>("kind")),
            payload: row.get("payload"),
            state,
            attempts: row.get("attempts"),
            max_attempts: row.get("max_attempts"),
            last_error: row.get("last_error"),
            result: row.get("result"),
            enqueued_at: row.get("enqueued_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            run_at: row.get("run_at"),
        })
    }

    /// Fail when an update touched no active job.
    fn expect_active(rows_affected: u64, job_id: Uuid) -> Result<()> {
        if rows_affected == 0 {
            Err(Error::JobNotFound(job_id))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<JobRecord> {
        let now = Utc::now();
        let state = if job.run_at > now {
            JobState::Delayed
        } else {
            JobState::Waiting
        };

        let query = format!(
            "INSERT INTO job_queue (id, kind, payload, state, attempts, max_attempts, enqueued_at, run_at)
             VALUES ($1, $2, $3, $4, 0, $5, $6, $7)
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(new_v7())
            .bind(job.kind.as_str())
            .bind(&job.payload)
            .bind(state.as_str())
            .bind(job.max_attempts.max(1))
            .bind(now)
            .bind(job.run_at)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        Self::parse_job_row(row)
    }

    async fn claim_next(
        &self,
        kinds: &[OperationKind],
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>> {
        let kind_strings: Vec<String> = kinds.iter().map(|k| k.as_str().to_string()).collect();

        // Filter by kind before locking; empty array claims any kind.
        let query = format!(
            "UPDATE job_queue
             SET state = 'active', started_at = $1, attempts = attempts + 1
             WHERE id = (
                 SELECT id FROM job_queue
                 WHERE state IN ('waiting', 'delayed') AND run_at <= $1
                   AND (cardinality($2::text[]) = 0 OR kind = ANY($2))
                 ORDER BY run_at ASC, enqueued_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(now)
            .bind(&kind_strings)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn complete(
        &self,
        job_id: Uuid,
        result: Option<JsonValue>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let done = sqlx::query(
            "UPDATE job_queue
             SET state = 'completed', result = $2, completed_at = $3, last_error = NULL
             WHERE id = $1 AND state = 'active'",
        )
        .bind(job_id)
        .bind(result)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::expect_active(done.rows_affected(), job_id)
    }

    async fn reschedule(&self, job_id: Uuid, error: &str, run_at: DateTime<Utc>) -> Result<()> {
        let done = sqlx::query(
            "UPDATE job_queue
             SET state = 'delayed', last_error = $2, run_at = $3
             WHERE id = $1 AND state = 'active'",
        )
        .bind(job_id)
        .bind(error)
        .bind(run_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::expect_active(done.rows_affected(), job_id)
    }

    async fn fail(&self, job_id: Uuid, error: &str, now: DateTime<Utc>) -> Result<()> {
        let done = sqlx::query(
            "UPDATE job_queue
             SET state = 'failed', last_error = $2, completed_at = $3
             WHERE id = $1 AND state = 'active'",
        )
        .bind(job_id)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Self::expect_active(done.rows_affected(), job_id)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM job_queue WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn counts(&self, now: DateTime<Utc>) -> Result<JobCounts> {
        let rows = sqlx::query(
            "SELECT CASE WHEN state = 'delayed' AND run_at <= $1 THEN 'waiting' ELSE state END
                        AS state,
                    COUNT(*) AS n
             FROM job_queue
             GROUP BY 1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut counts = JobCounts::default();
        for row in rows {
            let n: i64 = row.get("n");
            match JobState::parse(row.get::<&str, _>("state")) {
                Some(JobState::Waiting) => counts.waiting += n,
                Some(JobState::Active) => counts.active += n,
                Some(JobState::Completed) => counts.completed += n,
                Some(JobState::Failed) => counts.failed += n,
                Some(JobState::Delayed) => counts.delayed += n,
                None => {}
            }
        }
        Ok(counts)
    }

    async fn requeue_stalled(&self, started_before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE job_queue
             SET state = 'waiting', started_at = NULL
             WHERE state = 'active' AND started_at < $1",
        )
        .bind(started_before)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }

    async fn purge_terminal(&self, finished_before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM job_queue
             WHERE state IN ('completed', 'failed') AND completed_at < $1",
        )
        .bind(finished_before)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }
}
