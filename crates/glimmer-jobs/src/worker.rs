//! Worker configuration, events and the per-worker processing loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch, Notify, RwLock};
use tokio::task::{JoinError, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use glimmer_core::{defaults, env_or, Clock, JobRecord, JobStore, OperationKind};
use glimmer_inference::{InvocationLimiter, RetryPolicy};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Whether to run workers at all.
    pub enabled: bool,
    /// Number of independent workers.
    pub concurrency: usize,
    /// Jobs started per minute across the whole pool.
    pub rate_per_minute: u32,
    /// Attempts for jobs enqueued without an explicit budget.
    pub default_max_attempts: i32,
    /// Base retry delay; doubles per attempt.
    pub backoff: Duration,
    /// Cap on the computed retry delay.
    pub max_backoff: Duration,
    /// Delay for throttled jobs when the provider gave no hint.
    pub rate_limit_delay: Duration,
    pub job_timeout: Duration,
    /// Idle wait between polls when no job is runnable.
    pub poll_interval: Duration,
    pub shutdown_deadline: Duration,
    /// How long terminal jobs are kept.
    pub retention: Duration,
    pub purge_interval: Duration,
    /// Active jobs started longer ago than this are requeued on start.
    pub stall_threshold: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: defaults::JOB_CONCURRENCY,
            rate_per_minute: defaults::JOB_RATE_PER_MINUTE,
            default_max_attempts: defaults::JOB_MAX_ATTEMPTS,
            backoff: Duration::from_millis(defaults::JOB_BACKOFF_MS),
            max_backoff: Duration::from_millis(defaults::JOB_MAX_BACKOFF_MS),
            rate_limit_delay: Duration::from_millis(defaults::JOB_RATE_LIMIT_DELAY_MS),
            job_timeout: Duration::from_secs(defaults::JOB_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(defaults::JOB_POLL_INTERVAL_MS),
            shutdown_deadline: Duration::from_secs(defaults::JOB_SHUTDOWN_DEADLINE_SECS),
            retention: Duration::from_secs(defaults::JOB_RETENTION_SECS),
            purge_interval: Duration::from_secs(defaults::JOB_PURGE_INTERVAL_SECS),
            stall_threshold: Duration::from_secs(defaults::JOB_STALL_THRESHOLD_SECS),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_CONCURRENCY` | `2` | Worker pool size |
    /// | `JOB_RATE_PER_MINUTE` | `10` | Jobs started per minute |
    /// | `JOB_MAX_ATTEMPTS` | `3` | Attempt budget per job |
    /// | `JOB_BACKOFF_MS` | `5000` | Base retry delay |
    /// | `JOB_TIMEOUT_SECS` | `300` | Per-job execution timeout |
    /// | `JOB_POLL_INTERVAL_MS` | `1000` | Idle poll interval |
    /// | `JOB_RETENTION_SECS` | `86400` | Terminal job retention |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        Self {
            enabled,
            concurrency: env_or("JOB_CONCURRENCY", defaults::JOB_CONCURRENCY).max(1),
            rate_per_minute: env_or("JOB_RATE_PER_MINUTE", defaults::JOB_RATE_PER_MINUTE),
            default_max_attempts: env_or("JOB_MAX_ATTEMPTS", defaults::JOB_MAX_ATTEMPTS).max(1),
            backoff: Duration::from_millis(env_or("JOB_BACKOFF_MS", defaults::JOB_BACKOFF_MS)),
            job_timeout: Duration::from_secs(env_or("JOB_TIMEOUT_SECS", defaults::JOB_TIMEOUT_SECS)),
            poll_interval: Duration::from_millis(env_or(
                "JOB_POLL_INTERVAL_MS",
                defaults::JOB_POLL_INTERVAL_MS,
            )),
            retention: Duration::from_secs(env_or(
                "JOB_RETENTION_SECS",
                defaults::JOB_RETENTION_SECS,
            )),
            ..Self::default()
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_rate_per_minute(mut self, rate: u32) -> Self {
        self.rate_per_minute = rate;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.default_max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_rate_limit_delay(mut self, delay: Duration) -> Self {
        self.rate_limit_delay = delay;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_shutdown_deadline(mut self, deadline: Duration) -> Self {
        self.shutdown_deadline = deadline;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_stall_threshold(mut self, threshold: Duration) -> Self {
        self.stall_threshold = threshold;
        self
    }

    /// Backoff policy between attempts of one job.
    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.default_max_attempts as u32)
            .with_base_backoff(self.backoff)
            .with_max_backoff(self.max_backoff)
            .without_jitter()
    }
}

/// Event emitted by the worker pool.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    WorkerStarted { worker: usize },
    JobStarted {
        job_id: Uuid,
        kind: OperationKind,
        attempt: i32,
    },
    JobCompleted { job_id: Uuid, kind: OperationKind },
    /// The job will be retried at `run_at`.
    JobDelayed {
        job_id: Uuid,
        kind: OperationKind,
        run_at: DateTime<Utc>,
        error: String,
    },
    /// The job failed for good.
    JobFailed {
        job_id: Uuid,
        kind: OperationKind,
        error: String,
    },
    WorkerStopped { worker: usize },
}

/// State shared by the queue front-end and every worker.
pub(crate) struct QueueShared {
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) handlers: RwLock<HashMap<OperationKind, Arc<dyn JobHandler>>>,
    pub(crate) config: WorkerConfig,
    pub(crate) backoff: RetryPolicy,
    /// Pool-wide cap on jobs started per minute.
    pub(crate) start_limiter: InvocationLimiter,
    /// Signalled on enqueue so idle workers poll immediately.
    pub(crate) wake: Notify,
    pub(crate) event_tx: broadcast::Sender<WorkerEvent>,
}

impl QueueShared {
    pub(crate) fn emit(&self, event: WorkerEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn handler_kinds(&self) -> Vec<OperationKind> {
        self.handlers.read().await.keys().cloned().collect()
    }

    /// Delay before the next attempt of `job`: exponential backoff, but
    /// never less than `floor`.
    fn retry_delay(&self, job: &JobRecord, floor: Option<Duration>) -> Duration {
        let backoff = self.backoff.backoff_for(job.attempts.max(1) as u32);
        floor.map_or(backoff, |floor| floor.max(backoff))
    }
}

/// Wait for a pool start slot, claim a job and run it, until shutdown.
pub(crate) async fn run_worker(
    shared: Arc<QueueShared>,
    worker: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    shared.emit(WorkerEvent::WorkerStarted { worker });
    debug!(subsystem = "jobs", component = "worker", worker, "Worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        // Nothing is claimed yet, so stopping here leaves no job behind.
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = shared.start_limiter.acquire() => {}
        }

        let kinds = shared.handler_kinds().await;
        let claimed = if kinds.is_empty() {
            Ok(None)
        } else {
            shared.store.claim_next(&kinds, shared.clock.now()).await
        };

        match claimed {
            Ok(Some(job)) => {
                execute_job(&shared, worker, job).await;
                continue;
            }
            Ok(None) => shared.start_limiter.refund().await,
            Err(e) => {
                shared.start_limiter.refund().await;
                error!(
                    subsystem = "jobs",
                    component = "worker",
                    worker,
                    error = %e,
                    "Failed to claim job"
                );
            }
        }

        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = shared.wake.notified() => {}
            _ = sleep(shared.config.poll_interval) => {}
        }
    }

    shared.emit(WorkerEvent::WorkerStopped { worker });
    debug!(subsystem = "jobs", component = "worker", worker, "Worker stopped");
}

/// Execute a single claimed job and report the outcome to the store.
async fn execute_job(shared: &QueueShared, worker: usize, job: JobRecord) {
    let start = Instant::now();
    let job_id = job.id;
    let kind = job.kind.clone();

    info!(
        subsystem = "jobs",
        component = "worker",
        worker,
        %job_id,
        operation_kind = %kind,
        attempt = job.attempts,
        max_attempts = job.max_attempts,
        "Processing job"
    );
    shared.emit(WorkerEvent::JobStarted {
        job_id,
        kind: kind.clone(),
        attempt: job.attempts,
    });

    let handler = shared.handlers.read().await.get(&kind).cloned();
    let result = match handler {
        Some(handler) => run_handler(shared, handler, &job).await,
        None => {
            warn!(subsystem = "jobs", operation_kind = %kind, "No handler registered for kind");
            JobResult::Failed(format!("No handler for job kind: {}", kind))
        }
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    let now = shared.clock.now();

    match result {
        JobResult::Success(data) => match shared.store.complete(job_id, data, now).await {
            Ok(()) => {
                info!(subsystem = "jobs", %job_id, operation_kind = %kind, duration_ms, "Job completed");
                shared.emit(WorkerEvent::JobCompleted { job_id, kind });
            }
            Err(e) => error!(subsystem = "jobs", %job_id, error = %e, "Failed to mark job as completed"),
        },
        JobResult::Failed(error) => fail_job(shared, &job, error, now, duration_ms).await,
        JobResult::Retry(error) => retry_or_fail(shared, &job, error, None, now, duration_ms).await,
        JobResult::RateLimited { error, retry_after } => {
            let floor = retry_after.unwrap_or(shared.config.rate_limit_delay);
            retry_or_fail(shared, &job, error, Some(floor), now, duration_ms).await
        }
    }
}

/// Run the handler in its own task so a panic costs one attempt, not the
/// worker. Dropping the set aborts a handler that overran its timeout.
async fn run_handler(shared: &QueueShared, handler: Arc<dyn JobHandler>, job: &JobRecord) -> JobResult {
    let timeout = shared.config.job_timeout;
    let ctx = JobContext::new(job.clone());
    let mut task = JoinSet::new();
    task.spawn(async move { handler.execute(ctx).await });

    match tokio::time::timeout(timeout, task.join_next()).await {
        Ok(Some(Ok(result))) => result,
        Ok(Some(Err(e))) => {
            let reason = panic_message(e);
            error!(
                subsystem = "jobs",
                job_id = %job.id,
                operation_kind = %job.kind,
                error = %reason,
                "Job task panicked"
            );
            JobResult::Retry(format!("Job handler panicked: {}", reason))
        }
        Ok(None) => JobResult::Retry("Job handler did not run".to_string()),
        Err(_) => {
            warn!(
                subsystem = "jobs",
                job_id = %job.id,
                operation_kind = %job.kind,
                timeout_secs = timeout.as_secs(),
                "Job exceeded timeout"
            );
            JobResult::Retry(format!("Job exceeded timeout of {}s", timeout.as_secs()))
        }
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Reschedule `job` after backoff (never sooner than `floor`), or fail it
/// when its attempts are used up.
async fn retry_or_fail(
    shared: &QueueShared,
    job: &JobRecord,
    error: String,
    floor: Option<Duration>,
    now: DateTime<Utc>,
    duration_ms: u64,
) {
    if !job.has_attempts_left() {
        fail_job(shared, job, error, now, duration_ms).await;
        return;
    }

    let delay = shared.retry_delay(job, floor);
    let run_at = now + chrono::Duration::milliseconds(delay.as_millis() as i64);
    match shared.store.reschedule(job.id, &error, run_at).await {
        Ok(()) => {
            warn!(
                subsystem = "jobs",
                job_id = %job.id,
                operation_kind = %job.kind,
                attempt = job.attempts,
                delay_ms = delay.as_millis() as u64,
                rate_limited = floor.is_some(),
                %error,
                duration_ms,
                "Job failed, retry scheduled"
            );
            shared.emit(WorkerEvent::JobDelayed {
                job_id: job.id,
                kind: job.kind.clone(),
                run_at,
                error,
            });
        }
        Err(e) => error!(subsystem = "jobs", job_id = %job.id, error = %e, "Failed to reschedule job"),
    }
}

async fn fail_job(
    shared: &QueueShared,
    job: &JobRecord,
    error: String,
    now: DateTime<Utc>,
    duration_ms: u64,
) {
    match shared.store.fail(job.id, &error, now).await {
        Ok(()) => {
            warn!(
                subsystem = "jobs",
                job_id = %job.id,
                operation_kind = %job.kind,
                attempts = job.attempts,
                %error,
                duration_ms,
                "Job failed"
            );
            shared.emit(WorkerEvent::JobFailed {
                job_id: job.id,
                kind: job.kind.clone(),
                error,
            });
        }
        Err(e) => error!(subsystem = "jobs", job_id = %job.id, error = %e, "Failed to mark job as failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.concurrency, defaults::JOB_CONCURRENCY);
        assert_eq!(config.default_max_attempts, defaults::JOB_MAX_ATTEMPTS);
        assert_eq!(config.backoff, Duration::from_millis(defaults::JOB_BACKOFF_MS));
    }

    #[test]
    fn test_worker_config_builders_clamp() {
        let config = WorkerConfig::default()
            .with_concurrency(0)
            .with_max_attempts(0)
            .with_poll_interval(Duration::from_millis(10));
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.default_max_attempts, 1);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn test_retry_policy_doubles_from_base() {
        let policy = WorkerConfig::default()
            .with_backoff(Duration::from_secs(5))
            .retry_policy();
        assert_eq!(policy.backoff_for(1), Duration::from_secs(5));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(10));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(20));
    }
}
