//! Durable job queue implementation.
//!
//! Claiming is one conditional `UPDATE` over rows selected with
//! `FOR UPDATE SKIP LOCKED`, so concurrent workers (in any process) never
//! receive the same job. A claimed job carries a lease (`locked_until`); a
//! lease that expires without `complete`/`fail` is reaped on the next claim
//! and counts as an attempt. `complete` and `fail` only touch a row still
//! leased to the caller.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use collab_core::{
    defaults, new_v7, CompleteOutcome, Error, FailOutcome, JobQueue, JobStatus, QueuePayload,
    QueueStats, QueuedJob, Result,
};

const JOB_COLUMNS: &str = "id, job_type, payload, status, attempts, max_attempts, next_run_at, \
                           locked_by, locked_until, last_error, created_at";

const CLAIMED_COLUMNS: &str = "j.id, j.job_type, j.payload, j.status, j.attempts, j.max_attempts, \
                               j.next_run_at, j.locked_by, j.locked_until, j.last_error, j.created_at";

/// Exponential backoff after `attempts` failed attempts: `base * 2^(attempts-1)`, capped.
pub fn backoff_delay_ms(attempts: i32, base_ms: i64, max_ms: i64) -> i64 {
    let base = base_ms.max(0);
    let cap = max_ms.max(0);
    if attempts <= 1 {
        return base.min(cap);
    }
    let shift = attempts.saturating_sub(1).min(30) as u32;
    base.saturating_mul(1_i64 << shift).min(cap)
}

/// Retry and lease settings for [`PgJobQueue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Attempts before a job is dead-lettered.
    pub max_attempts: i32,
    /// Backoff base in milliseconds.
    pub backoff_base_ms: i64,
    /// Backoff cap in milliseconds.
    pub backoff_max_ms: i64,
    /// Lease granted to a claiming worker.
    pub lock_duration: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::JOB_MAX_ATTEMPTS,
            backoff_base_ms: defaults::JOB_BACKOFF_BASE_MS,
            backoff_max_ms: defaults::JOB_BACKOFF_MAX_MS,
            lock_duration: Duration::from_secs(defaults::JOB_LOCK_SECS),
        }
    }
}

impl QueueConfig {
    /// Load from `JOB_MAX_ATTEMPTS`, `JOB_BACKOFF_BASE_MS`, `JOB_BACKOFF_MAX_MS`
    /// and `JOB_LOCK_SECS`; invalid values fall back to defaults.
    pub fn from_env() -> Self {
        fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.parse().ok())
        }

        let defaults = Self::default();
        Self {
            max_attempts: parsed::<i32>("JOB_MAX_ATTEMPTS")
                .filter(|n| *n >= 1)
                .unwrap_or(defaults.max_attempts),
            backoff_base_ms: parsed::<i64>("JOB_BACKOFF_BASE_MS")
                .filter(|n| *n >= 0)
                .unwrap_or(defaults.backoff_base_ms),
            backoff_max_ms: parsed::<i64>("JOB_BACKOFF_MAX_MS")
                .filter(|n| *n >= 0)
                .unwrap_or(defaults.backoff_max_ms),
            lock_duration: parsed::<u64>("JOB_LOCK_SECS")
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.lock_duration),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, base_ms: i64, max_ms: i64) -> Self {
        self.backoff_base_ms = base_ms;
        self.backoff_max_ms = max_ms;
        self
    }

    pub fn with_lock_duration(mut self, lock_duration: Duration) -> Self {
        self.lock_duration = lock_duration;
        self
    }

    /// Delay before the next run after `attempts` failed attempts.
    pub fn backoff_for(&self, attempts: i32) -> i64 {
        backoff_delay_ms(attempts, self.backoff_base_ms, self.backoff_max_ms)
    }
}

/// PostgreSQL implementation of [`JobQueue`], generic over the payload type.
pub struct PgJobQueue<P> {
    pool: Pool<Postgres>,
    config: QueueConfig,
    /// Wakes colocated workers on enqueue; polling remains the fallback.
    notify: Arc<Notify>,
    _payload: PhantomData<fn() -> P>,
}

impl<P> Clone for PgJobQueue<P> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            config: self.config.clone(),
            notify: self.notify.clone(),
            _payload: PhantomData,
        }
    }
}

impl<P: QueuePayload> PgJobQueue<P> {
    /// Create a queue with default retry settings.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self::with_config(pool, QueueConfig::default())
    }

    pub fn with_config(pool: Pool<Postgres>, config: QueueConfig) -> Self {
        Self {
            pool,
            config,
            notify: Arc::new(Notify::new()),
            _payload: PhantomData,
        }
    }

    /// Share an existing notify handle.
    pub fn with_notify(mut self, notify: Arc<Notify>) -> Self {
        self.notify = notify;
        self
    }

    /// Get the job notification handle for event-driven waking.
    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn parse_job_row(row: &PgRow) -> Result<QueuedJob<P>> {
        let job_type: String = row.try_get("job_type")?;
        let raw: JsonValue = row.try_get("payload")?;
        let payload = serde_json::from_value::<P>(raw).map_err(|e| {
            Error::Serialization(format!("undecodable payload for job type {}: {}", job_type, e))
        })?;
        let status: String = row.try_get("status")?;

        Ok(QueuedJob {
            id: row.try_get("id")?,
            job_type,
            payload,
            status: JobStatus::parse(&status)?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            next_run_at: row.try_get("next_run_at")?,
            locked_by: row.try_get("locked_by")?,
            locked_until: row.try_get("locked_until")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
        })
    }

    /// Return expired leases to `pending`, or `dead` when the budget is spent.
    async fn reap_expired_leases(&self) -> Result<u64> {
        let rows = sqlx::query(
            "WITH expired AS (
                 SELECT id FROM job_queue
                 WHERE status = 'processing' AND locked_until < now()
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE job_queue j
             SET attempts = j.attempts + 1,
                 status = CASE WHEN j.attempts + 1 >= j.max_attempts THEN 'dead' ELSE 'pending' END,
                 completed_at = CASE WHEN j.attempts + 1 >= j.max_attempts THEN now() ELSE NULL END,
                 next_run_at = now(),
                 last_error = 'lease expired while held by ' || COALESCE(j.locked_by, 'unknown worker'),
                 locked_by = NULL,
                 locked_until = NULL
             FROM expired
             WHERE j.id = expired.id
             RETURNING j.id, j.status, j.attempts",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        for row in &rows {
            let id: Uuid = row.try_get("id")?;
            let status: String = row.try_get("status")?;
            let attempts: i32 = row.try_get("attempts")?;
            if status == "dead" {
                error!(
                    subsystem = "db",
                    component = "job_queue",
                    op = "reap",
                    job_id = %id,
                    attempts,
                    "Job lease expired with retry budget exhausted; dead-lettered"
                );
            } else {
                warn!(
                    subsystem = "db",
                    component = "job_queue",
                    op = "reap",
                    job_id = %id,
                    attempts,
                    "Job lease expired; returned to pending"
                );
            }
        }
        Ok(rows.len() as u64)
    }

    /// Most recent dead-lettered jobs. Undecodable rows are skipped.
    pub async fn list_dead(&self, limit: i64) -> Result<Vec<QueuedJob<P>>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job_queue
             WHERE status = 'dead'
             ORDER BY completed_at DESC NULLS LAST, created_at DESC
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .iter()
            .filter_map(|row| Self::parse_job_row(row).ok())
            .collect())
    }

    /// Resurrect a dead job with a fresh attempt budget. Returns false if the
    /// job is not dead.
    pub async fn requeue(&self, job_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE job_queue
             SET status = 'pending', attempts = 0, next_run_at = now(),
                 locked_by = NULL, locked_until = NULL, completed_at = NULL
             WHERE id = $1 AND status = 'dead'",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() > 0 => {
                info!(
                    subsystem = "db",
                    component = "job_queue",
                    op = "requeue",
                    job_id = %job_id,
                    "Dead job requeued"
                );
                self.notify.notify_waiters();
                Ok(true)
            }
            Ok(_) => Ok(false),
            Err(e) if collab_core::error::is_unique_violation(&e) => Err(Error::Job(format!(
                "job {} duplicates a live job with the same dedup key",
                job_id
            ))),
            Err(e) => Err(Error::Database(e)),
        }
    }

    /// Delete completed jobs that finished before `older_than` ago.
    pub async fn purge_completed(&self, older_than: chrono::Duration) -> Result<u64> {
        let cutoff: DateTime<Utc> = Utc::now() - older_than;
        let result = sqlx::query(
            "DELETE FROM job_queue WHERE status = 'completed' AND completed_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl<P: QueuePayload> JobQueue<P> for PgJobQueue<P> {
    async fn enqueue(&self, payload: P) -> Result<Uuid> {
        let job_id = new_v7();
        let job_type = payload.job_type();
        let json = serde_json::to_value(&payload)?;

        sqlx::query(
            "INSERT INTO job_queue (id, job_type, payload, status, max_attempts)
             VALUES ($1, $2, $3, 'pending', $4)",
        )
        .bind(job_id)
        .bind(job_type)
        .bind(&json)
        .bind(self.config.max_attempts)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "job_queue",
            op = "enqueue",
            job_id = %job_id,
            job_type,
            "Job enqueued"
        );
        self.notify.notify_waiters();
        Ok(job_id)
    }

    async fn enqueue_unique(&self, payload: P, dedup_key: &str) -> Result<Option<Uuid>> {
        let job_id = new_v7();
        let job_type = payload.job_type();
        let json = serde_json::to_value(&payload)?;

        // NOT EXISTS covers the common case; the partial unique index settles
        // the race between two concurrent inserts.
        let inserted = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO job_queue (id, job_type, payload, status, max_attempts, dedup_key)
             SELECT $1, $2, $3, 'pending', $4, $5
             WHERE NOT EXISTS (
                 SELECT 1 FROM job_queue
                 WHERE dedup_key = $5 AND status IN ('pending', 'processing')
             )
             ON CONFLICT DO NOTHING
             RETURNING id",
        )
        .bind(job_id)
        .bind(job_type)
        .bind(&json)
        .bind(self.config.max_attempts)
        .bind(dedup_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        if inserted.is_some() {
            self.notify.notify_waiters();
        } else {
            debug!(
                subsystem = "db",
                component = "job_queue",
                op = "enqueue_unique",
                dedup_key,
                job_type,
                "Live job with same dedup key exists; skipped"
            );
        }
        Ok(inserted)
    }

    async fn claim_next(&self, worker_id: &str, limit: usize) -> Result<Vec<QueuedJob<P>>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.reap_expired_leases().await?;

        let rows = sqlx::query(&format!(
            "WITH due AS (
                 SELECT id FROM job_queue
                 WHERE status = 'pending' AND next_run_at <= now()
                 ORDER BY next_run_at, created_at
                 LIMIT $3
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE job_queue j
             SET status = 'processing',
                 locked_by = $1,
                 locked_until = now() + make_interval(secs => $2::double precision)
             FROM due
             WHERE j.id = due.id
             RETURNING {CLAIMED_COLUMNS}"
        ))
        .bind(worker_id)
        .bind(self.config.lock_duration.as_secs_f64())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in &rows {
            match Self::parse_job_row(row) {
                Ok(job) => claimed.push(job),
                Err(e) => {
                    let id: Uuid = row.try_get("id")?;
                    warn!(
                        subsystem = "db",
                        component = "job_queue",
                        op = "claim_next",
                        job_id = %id,
                        error = %e,
                        "Claimed job has an undecodable payload; failing it"
                    );
                    // The rest of the batch is already claimed and must be returned.
                    if let Err(fail_err) = self.fail(id, worker_id, &e.to_string()).await {
                        error!(
                            subsystem = "db",
                            component = "job_queue",
                            op = "claim_next",
                            job_id = %id,
                            error = %fail_err,
                            "Could not fail undecodable job; its lease will expire"
                        );
                    }
                }
            }
        }
        claimed.sort_by(|a, b| {
            a.next_run_at
                .cmp(&b.next_run_at)
                .then(a.created_at.cmp(&b.created_at))
        });

        if !claimed.is_empty() {
            debug!(
                subsystem = "db",
                component = "job_queue",
                op = "claim_next",
                worker_id,
                result_count = claimed.len(),
                "Claimed jobs"
            );
        }
        Ok(claimed)
    }

    async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: Option<JsonValue>,
    ) -> Result<CompleteOutcome> {
        let done = sqlx::query(
            "UPDATE job_queue
             SET status = 'completed', result = $3, completed_at = now(),
                 locked_by = NULL, locked_until = NULL
             WHERE id = $1 AND status = 'processing' AND locked_by = $2",
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(&result)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if done.rows_affected() > 0 {
            return Ok(CompleteOutcome::Completed);
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM job_queue WHERE id = $1)")
                .bind(job_id)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        if !exists {
            return Err(Error::NotFound(format!("job {}", job_id)));
        }
        warn!(
            subsystem = "db",
            component = "job_queue",
            op = "complete",
            job_id = %job_id,
            worker_id,
            "Completion rejected; lease no longer held"
        );
        Ok(CompleteOutcome::LeaseLost)
    }

    async fn fail(&self, job_id: Uuid, worker_id: &str, error: &str) -> Result<FailOutcome> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let current: Option<(i32, i32, String, Option<String>)> = sqlx::query_as(
            "SELECT attempts, max_attempts, status, locked_by FROM job_queue
             WHERE id = $1 FOR UPDATE",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let (attempts, max_attempts, status, locked_by) =
            current.ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;
        if status != JobStatus::Processing.as_str() || locked_by.as_deref() != Some(worker_id) {
            warn!(
                subsystem = "db",
                component = "job_queue",
                op = "fail",
                job_id = %job_id,
                worker_id,
                status = %status,
                "Failure rejected; lease no longer held"
            );
            return Ok(FailOutcome::LeaseLost);
        }

        let attempts = attempts + 1;
        let outcome = if attempts >= max_attempts {
            sqlx::query(
                "UPDATE job_queue
                 SET status = 'dead', attempts = $2, last_error = $3, completed_at = now(),
                     locked_by = NULL, locked_until = NULL
                 WHERE id = $1",
            )
            .bind(job_id)
            .bind(attempts)
            .bind(error)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            FailOutcome::Dead { attempts }
        } else {
            let delay_ms = self.config.backoff_for(attempts);
            let next_run_at: DateTime<Utc> = sqlx::query_scalar(
                "UPDATE job_queue
                 SET status = 'pending', attempts = $2, last_error = $3,
                     next_run_at = now() + ($4::double precision * interval '1 millisecond'),
                     locked_by = NULL, locked_until = NULL
                 WHERE id = $1
                 RETURNING next_run_at",
            )
            .bind(job_id)
            .bind(attempts)
            .bind(error)
            .bind(delay_ms as f64)
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::Database)?;

            FailOutcome::Retrying {
                attempts,
                next_run_at,
            }
        };

        tx.commit().await.map_err(Error::Database)?;
        Ok(outcome)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<QueuedJob<P>>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM job_queue WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.as_ref().map(Self::parse_job_row).transpose()
    }

    async fn stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'processing') AS processing,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'dead') AS dead,
                COUNT(*) AS total
             FROM job_queue",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(QueueStats {
            pending: row.try_get("pending")?,
            processing: row.try_get("processing")?,
            completed: row.try_get("completed")?,
            dead: row.try_get("dead")?,
            total: row.try_get("total")?,
        })
    }
}
