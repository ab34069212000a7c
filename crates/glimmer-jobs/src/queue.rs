//! Job queue front-end: enqueue, status, metrics and pool lifecycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, watch, Mutex, Notify, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use glimmer_core::{
    defaults, Clock, Error, JobCounts, JobRecord, JobState, JobStore, NewJob, OperationKind,
    Result, SystemClock,
};
use glimmer_inference::InvocationLimiter;

use crate::handler::JobHandler;
use crate::worker::{run_worker, QueueShared, WorkerConfig, WorkerEvent};

/// Per-job enqueue options.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Attempt budget; the queue default when unset.
    pub max_attempts: Option<i32>,
    /// Do not run before this much time has passed.
    pub delay: Option<Duration>,
}

impl JobOptions {
    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Returned by [`JobQueue::enqueue`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobHandle {
    pub id: Uuid,
    pub kind: OperationKind,
    pub state: JobState,
}

struct RunningPool {
    shutdown_tx: watch::Sender<bool>,
    workers: JoinSet<()>,
    maintenance: JoinHandle<()>,
}

/// Durable job queue with a bounded, rate-limited worker pool.
///
/// The [`JobStore`] owns every job record; workers only report outcomes
/// back through it. Construct, register handlers, then [`start`](Self::start).
pub struct JobQueue {
    shared: Arc<QueueShared>,
    accepting: AtomicBool,
    pool: Mutex<Option<RunningPool>>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>, config: WorkerConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Build with [`WorkerConfig::from_env`].
    pub fn from_env(store: Arc<dyn JobStore>) -> Self {
        Self::new(store, WorkerConfig::from_env())
    }

    pub fn with_clock(store: Arc<dyn JobStore>, config: WorkerConfig, clock: Arc<dyn Clock>) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        let shared = QueueShared {
            store,
            clock,
            handlers: RwLock::new(HashMap::new()),
            backoff: config.retry_policy(),
            start_limiter: InvocationLimiter::per_minute("job_starts", config.rate_per_minute),
            wake: Notify::new(),
            event_tx,
            config,
        };
        Self {
            shared: Arc::new(shared),
            accepting: AtomicBool::new(true),
            pool: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.shared.config
    }

    /// Register the handler for its operation kind, replacing any previous one.
    pub async fn register_handler<H: JobHandler + 'static>(&self, handler: H) {
        let kind = handler.kind();
        debug!(subsystem = "jobs", operation_kind = %kind, "Registered job handler");
        self.shared
            .handlers
            .write()
            .await
            .insert(kind, Arc::new(handler));
    }

    /// Persist a new job. Fails once shutdown has begun.
    pub async fn enqueue(
        &self,
        kind: OperationKind,
        payload: JsonValue,
        options: JobOptions,
    ) -> Result<JobHandle> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(Error::Job("Queue is shutting down".to_string()));
        }

        let now = self.shared.clock.now();
        let run_at = match options.delay {
            Some(delay) => now + chrono::Duration::milliseconds(delay.as_millis() as i64),
            None => now,
        };
        let job = self
            .shared
            .store
            .enqueue(NewJob {
                kind,
                payload,
                max_attempts: options
                    .max_attempts
                    .unwrap_or(self.shared.config.default_max_attempts)
                    .max(1),
                run_at,
            })
            .await?;

        info!(
            subsystem = "jobs",
            job_id = %job.id,
            operation_kind = %job.kind,
            max_attempts = job.max_attempts,
            state = %job.state,
            "Job enqueued"
        );
        self.shared.wake.notify_one();

        Ok(JobHandle {
            id: job.id,
            kind: job.kind,
            state: job.state,
        })
    }

    /// Full job record.
    pub async fn job(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        self.shared.store.get(job_id).await
    }

    /// Current state of a job.
    ///
    /// A delayed job whose delay has passed reports `waiting`.
    pub async fn status(&self, job_id: Uuid) -> Result<Option<JobState>> {
        let now = self.shared.clock.now();
        Ok(self
            .shared
            .store
            .get(job_id)
            .await?
            .map(|job| job.state_at(now)))
    }

    /// Job counts per state, with due delayed jobs counted as waiting.
    pub async fn metrics(&self) -> Result<JobCounts> {
        self.shared.store.counts(self.shared.clock.now()).await
    }

    /// Subscribe to worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Delete terminal jobs older than the retention window.
    pub async fn purge_finished(&self) -> Result<u64> {
        purge_finished(&self.shared).await
    }

    /// Whether the worker pool is running.
    pub async fn is_running(&self) -> bool {
        self.pool.lock().await.is_some()
    }

    /// Recover stalled jobs, then spawn the worker pool and the retention purge.
    pub async fn start(&self) -> Result<()> {
        let config = &self.shared.config;
        if !config.enabled {
            info!(subsystem = "jobs", "Job workers are disabled, not starting");
            return Ok(());
        }

        let mut pool = self.pool.lock().await;
        if pool.is_some() {
            return Err(Error::Job("Worker pool already started".to_string()));
        }

        let stalled_before = self.shared.clock.now()
            - chrono::Duration::milliseconds(config.stall_threshold.as_millis() as i64);
        let requeued = self.shared.store.requeue_stalled(stalled_before).await?;
        if requeued > 0 {
            warn!(subsystem = "jobs", requeued, "Requeued stalled jobs");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut workers = JoinSet::new();
        for worker in 0..config.concurrency {
            workers.spawn(run_worker(self.shared.clone(), worker, shutdown_rx.clone()));
        }

        let shared = self.shared.clone();
        let maintenance = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(shared.config.purge_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = purge_finished(&shared).await {
                    error!(subsystem = "jobs", error = %e, "Job retention purge failed");
                }
            }
        });

        info!(
            subsystem = "jobs",
            concurrency = config.concurrency,
            rate_per_minute = config.rate_per_minute,
            "Job workers started"
        );

        *pool = Some(RunningPool {
            shutdown_tx,
            workers,
            maintenance,
        });
        Ok(())
    }

    /// Stop accepting jobs and drain the pool.
    ///
    /// Active jobs get until the shutdown deadline to finish; stragglers are
    /// aborted and stay `active` in the store until the next start recovers them.
    pub async fn shutdown(&self) -> Result<()> {
        self.accepting.store(false, Ordering::SeqCst);

        let Some(mut pool) = self.pool.lock().await.take() else {
            return Ok(());
        };

        info!(subsystem = "jobs", "Shutting down job workers");
        let _ = pool.shutdown_tx.send(true);
        pool.maintenance.abort();

        let deadline = self.shared.config.shutdown_deadline;
        let drained = tokio::time::timeout(deadline, async {
            while let Some(joined) = pool.workers.join_next().await {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!(subsystem = "jobs", error = %e, "Worker panicked");
                    }
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                subsystem = "jobs",
                deadline_secs = deadline.as_secs(),
                remaining = pool.workers.len(),
                "Shutdown deadline reached, aborting in-flight jobs"
            );
            pool.workers.abort_all();
            while pool.workers.join_next().await.is_some() {}
        }

        info!(subsystem = "jobs", "Job workers stopped");
        Ok(())
    }
}

async fn purge_finished(shared: &QueueShared) -> Result<u64> {
    let cutoff = shared.clock.now()
        - chrono::Duration::milliseconds(shared.config.retention.as_millis() as i64);
    let purged = shared.store.purge_terminal(cutoff).await?;
    if purged > 0 {
        debug!(subsystem = "jobs", purged, "Purged finished jobs");
    }
    Ok(purged)
}
