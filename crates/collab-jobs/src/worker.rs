//! Job worker: polls the queue, dispatches claimed batches, records outcomes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use collab_core::{
    defaults, CompleteOutcome, Error, FailOutcome, JobPayload, JobQueue, JobType, QueuedJob,
    Result,
};

use crate::dispatcher::{Dispatcher, HandlerSet};
use crate::handler::{HandlerOutcome, JobContext};

/// Lock owner used when `JOB_WORKER_ID` is unset: `<hostname>-<pid>`.
pub fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "collab-worker".to_string());
    format!("{}-{}", host, std::process::id())
}

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between polls when the queue is empty, in milliseconds.
    pub poll_interval_ms: u64,
    /// Jobs claimed per poll and processed concurrently.
    pub batch_size: usize,
    /// Per-job execution timeout.
    pub job_timeout: Duration,
    /// Lock owner recorded on claimed jobs.
    pub worker_id: String,
    /// Whether to enable job processing.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::JOB_POLL_INTERVAL_MS,
            batch_size: defaults::JOB_BATCH_SIZE,
            job_timeout: Duration::from_secs(defaults::JOB_TIMEOUT_SECS),
            worker_id: default_worker_id(),
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_WORKER_ID` | `<hostname>-<pid>` | Lock owner on claimed jobs |
    /// | `JOB_BATCH_SIZE` | `4` | Jobs claimed per poll |
    /// | `JOB_POLL_INTERVAL_MS` | `5000` | Polling interval when queue is empty |
    /// | `JOB_TIMEOUT_SECS` | `300` | Per-job execution timeout |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let worker_id = std::env::var("JOB_WORKER_ID")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(default_worker_id);

        let batch_size = std::env::var("JOB_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::JOB_BATCH_SIZE)
            .max(1);

        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::JOB_POLL_INTERVAL_MS);

        let timeout_secs = std::env::var("JOB_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|s| *s > 0)
            .unwrap_or(defaults::JOB_TIMEOUT_SECS);

        Self {
            poll_interval_ms,
            batch_size,
            job_timeout: Duration::from_secs(timeout_secs),
            worker_id,
            enabled,
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The queue lease must outlive the job timeout, or a live worker could
    /// lose its job to a second claimant mid-execution.
    pub fn validate(&self, lock_duration: Duration) -> Result<()> {
        if lock_duration <= self.job_timeout {
            return Err(Error::Config(format!(
                "job lock lease ({}s) must exceed job timeout ({}s)",
                lock_duration.as_secs(),
                self.job_timeout.as_secs()
            )));
        }
        Ok(())
    }
}

/// Event emitted by the job worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    JobStarted { job_id: Uuid, job_type: JobType },
    JobCompleted { job_id: Uuid, job_type: JobType },
    /// Completed without doing work; the unit no longer applied.
    JobSkipped {
        job_id: Uuid,
        job_type: JobType,
        reason: String,
    },
    JobFailed {
        job_id: Uuid,
        job_type: JobType,
        error: String,
        outcome: FailOutcome,
    },
    WorkerStarted,
    WorkerStopped,
}

/// Handle for controlling a running worker.
///
/// Dropping the handle stops the worker at its next idle poll.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to shut down after its current batch.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }

    /// Wait for the worker loop to exit.
    pub async fn stopped(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| Error::Internal(format!("worker task failed: {}", e)))
    }
}

/// Job worker that processes jobs from the queue.
pub struct JobWorker {
    queue: Arc<dyn JobQueue<JobPayload>>,
    dispatcher: Dispatcher,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
    notify: Option<Arc<Notify>>,
}

impl JobWorker {
    pub fn new(
        queue: Arc<dyn JobQueue<JobPayload>>,
        handlers: HandlerSet,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            queue,
            dispatcher: Dispatcher::new(handlers),
            config,
            event_tx,
            notify: None,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        let task = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
            task,
        }
    }

    /// Run the worker loop until shutdown.
    ///
    /// Claims up to `batch_size` jobs at a time and processes them
    /// concurrently. Only sleeps when the queue is empty; an enqueue in the
    /// same process cuts the sleep short.
    #[instrument(skip(self, shutdown_rx), fields(worker_id = %self.config.worker_id))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Job worker is disabled, not starting");
            return;
        }

        info!(
            subsystem = "jobs",
            component = "worker",
            poll_interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.batch_size,
            job_timeout_secs = self.config.job_timeout.as_secs(),
            "Job worker started"
        );

        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Job worker received shutdown signal");
                break;
            }

            let processed = match self.run_once().await {
                Ok(n) => n,
                Err(e) => {
                    // Database unreachable or similar; back off like an empty queue.
                    error!(
                        subsystem = "jobs",
                        component = "worker",
                        error = %e,
                        "Failed to claim jobs"
                    );
                    0
                }
            };

            if processed == 0 {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Job worker received shutdown signal");
                        break;
                    }
                    _ = Self::wait_for_work(self.notify.as_deref(), poll_interval) => {}
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Job worker stopped");
    }

    async fn wait_for_work(notify: Option<&Notify>, poll_interval: Duration) {
        match notify {
            Some(notify) => {
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = sleep(poll_interval) => {}
                }
            }
            None => sleep(poll_interval).await,
        }
    }

    /// Claim one batch, process it to completion, and return its size.
    pub async fn run_once(&self) -> Result<usize> {
        let jobs = self
            .queue
            .claim_next(&self.config.worker_id, self.config.batch_size)
            .await?;
        let claimed = jobs.len();
        if claimed == 0 {
            return Ok(0);
        }

        debug!(claimed, "Processing job batch");
        let mut tasks = tokio::task::JoinSet::new();
        for job in jobs {
            let worker = self.clone_refs();
            tasks.spawn(async move {
                worker.execute_job(job).await;
            });
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                // The job stays processing; its lease expiry returns it to the queue.
                error!(error = ?e, "Job task panicked");
            }
        }
        Ok(claimed)
    }

    /// Process batches until the queue has nothing due. Returns the job count.
    pub async fn drain(&self) -> Result<usize> {
        let mut total = 0;
        loop {
            let n = self.run_once().await?;
            if n == 0 {
                return Ok(total);
            }
            total += n;
        }
    }

    /// Clone references needed for spawned job tasks.
    fn clone_refs(&self) -> JobWorkerRef {
        JobWorkerRef {
            queue: self.queue.clone(),
            dispatcher: self.dispatcher.clone(),
            event_tx: self.event_tx.clone(),
            worker_id: self.config.worker_id.clone(),
            job_timeout: self.config.job_timeout,
        }
    }
}

/// Lightweight reference bundle for executing a single job in a spawned task.
struct JobWorkerRef {
    queue: Arc<dyn JobQueue<JobPayload>>,
    dispatcher: Dispatcher,
    event_tx: broadcast::Sender<WorkerEvent>,
    worker_id: String,
    job_timeout: Duration,
}

impl JobWorkerRef {
    /// Execute a single claimed job.
    async fn execute_job(self, job: QueuedJob<JobPayload>) {
        let start = Instant::now();
        let job_id = job.id;
        let job_type = job.payload.kind();

        info!(
            subsystem = "jobs",
            component = "worker",
            job_id = %job_id,
            job_type = %job_type,
            attempts = job.attempts,
            "Processing job"
        );
        let _ = self
            .event_tx
            .send(WorkerEvent::JobStarted { job_id, job_type });

        let ctx = JobContext::for_job(&job, &self.worker_id);
        let result = match tokio::time::timeout(
            self.job_timeout,
            self.dispatcher.dispatch(&ctx, &job.payload),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Job(format!(
                "Job exceeded timeout of {}s",
                self.job_timeout.as_secs()
            ))),
        };

        match result {
            Ok(outcome) => self.record_success(job_id, job_type, outcome, start).await,
            Err(e) => self.record_failure(job_id, job_type, e, start).await,
        }
    }

    async fn record_success(
        &self,
        job_id: Uuid,
        job_type: JobType,
        outcome: HandlerOutcome,
        start: Instant,
    ) {
        let event = match &outcome {
            HandlerOutcome::Completed(_) => WorkerEvent::JobCompleted { job_id, job_type },
            HandlerOutcome::Skipped(reason) => WorkerEvent::JobSkipped {
                job_id,
                job_type,
                reason: reason.clone(),
            },
        };

        match self
            .queue
            .complete(job_id, &self.worker_id, outcome.into_result())
            .await
        {
            Ok(CompleteOutcome::Completed) => {}
            Ok(CompleteOutcome::LeaseLost) => {
                warn!(
                    subsystem = "jobs",
                    component = "worker",
                    job_id = %job_id,
                    job_type = %job_type,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job finished after its lease expired; result discarded"
                );
                return;
            }
            Err(e) => {
                error!(error = %e, job_id = %job_id, "Failed to mark job as completed");
                return;
            }
        }

        match &event {
            WorkerEvent::JobSkipped { reason, .. } => info!(
                subsystem = "jobs",
                component = "worker",
                job_id = %job_id,
                job_type = %job_type,
                reason = %reason,
                duration_ms = start.elapsed().as_millis() as u64,
                "Job skipped; work no longer applicable"
            ),
            _ => info!(
                subsystem = "jobs",
                component = "worker",
                job_id = %job_id,
                job_type = %job_type,
                duration_ms = start.elapsed().as_millis() as u64,
                "Job completed successfully"
            ),
        }
        let _ = self.event_tx.send(event);
    }

    async fn record_failure(&self, job_id: Uuid, job_type: JobType, err: Error, start: Instant) {
        let message = err.to_string();
        let outcome = match self.queue.fail(job_id, &self.worker_id, &message).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, job_id = %job_id, "Failed to mark job as failed");
                return;
            }
        };

        match outcome {
            FailOutcome::Retrying {
                attempts,
                next_run_at,
            } => warn!(
                subsystem = "jobs",
                component = "worker",
                job_id = %job_id,
                job_type = %job_type,
                attempts,
                next_run_at = %next_run_at,
                transient = err.is_transient(),
                error = %message,
                duration_ms = start.elapsed().as_millis() as u64,
                "Job failed; will retry"
            ),
            FailOutcome::Dead { attempts } => error!(
                subsystem = "jobs",
                component = "worker",
                job_id = %job_id,
                job_type = %job_type,
                attempts,
                error = %message,
                duration_ms = start.elapsed().as_millis() as u64,
                "Job failed; retry budget exhausted, dead-lettered"
            ),
            FailOutcome::LeaseLost => {
                warn!(
                    subsystem = "jobs",
                    component = "worker",
                    job_id = %job_id,
                    job_type = %job_type,
                    error = %message,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job failed after its lease expired; failure discarded"
                );
                return;
            }
        }

        let _ = self.event_tx.send(WorkerEvent::JobFailed {
            job_id,
            job_type,
            error: message,
            outcome,
        });
    }
}

/// Builder for creating a job worker.
pub struct WorkerBuilder {
    queue: Arc<dyn JobQueue<JobPayload>>,
    handlers: HandlerSet,
    config: WorkerConfig,
    notify: Option<Arc<Notify>>,
}

impl WorkerBuilder {
    pub fn new(queue: Arc<dyn JobQueue<JobPayload>>, handlers: HandlerSet) -> Self {
        Self {
            queue,
            handlers,
            config: WorkerConfig::default(),
            notify: None,
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Wake the idle worker when this is notified (shared with the queue).
    pub fn with_notify(mut self, notify: Arc<Notify>) -> Self {
        self.notify = Some(notify);
        self
    }

    pub fn build(self) -> JobWorker {
        let mut worker = JobWorker::new(self.queue, self.handlers, self.config);
        worker.notify = self.notify;
        worker
    }
}
