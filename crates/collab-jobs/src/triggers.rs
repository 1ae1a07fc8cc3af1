//! Trigger API: the only way other subsystems reach the pipeline.
//!
//! Every trigger durably enqueues work and returns; nothing runs in the
//! caller's process. Keyed payloads go through `enqueue_unique`, so repeating
//! a trigger while its job is still live adds nothing. Matching work for
//! known profile versions is keyed on those versions as well: a job already
//! evaluating older versions never absorbs a request for newer ones.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use collab_core::{
    EligibilityResolver, EvaluationKey, ExpandMatchPoolJob, GenerateProfileJob, JobPayload,
    JobQueue, MatchingDataSource, MonthlyRefreshJob, PairCandidate, PairKey, PairScope, Result,
    RunMatchingJob, SendEmailJob,
};

/// What a trigger did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TriggerReport {
    /// Jobs the trigger tried to enqueue.
    pub considered: usize,
    pub enqueued: usize,
    /// Absorbed by an existing pending or processing job.
    pub already_queued: usize,
}

impl TriggerReport {
    fn record(&mut self, inserted: Option<Uuid>) {
        self.considered += 1;
        match inserted {
            Some(_) => self.enqueued += 1,
            None => self.already_queued += 1,
        }
    }
}

/// Enqueues pipeline work on behalf of external events.
#[derive(Clone)]
pub struct Triggers {
    queue: Arc<dyn JobQueue<JobPayload>>,
    resolver: Arc<dyn EligibilityResolver>,
    data: Arc<dyn MatchingDataSource>,
}

impl Triggers {
    pub fn new(
        queue: Arc<dyn JobQueue<JobPayload>>,
        resolver: Arc<dyn EligibilityResolver>,
        data: Arc<dyn MatchingDataSource>,
    ) -> Self {
        Self {
            queue,
            resolver,
            data,
        }
    }

    /// Enqueue a payload, deduplicating on its key when it has one.
    ///
    /// Returns `None` when a live job with the same key absorbed it.
    pub async fn submit(&self, payload: JobPayload) -> Result<Option<Uuid>> {
        match payload.dedup_key() {
            Some(key) => self.queue.enqueue_unique(payload, &key).await,
            None => self.queue.enqueue(payload).await.map(Some),
        }
    }

    /// Enqueue `run_matching` for each evaluation, keyed on pair and versions.
    async fn submit_evaluations(&self, evaluations: Vec<EvaluationKey>) -> Result<TriggerReport> {
        let mut report = TriggerReport::default();
        for key in evaluations {
            let payload = JobPayload::RunMatching(RunMatchingJob::for_pair(key.pair));
            let inserted = self
                .queue
                .enqueue_unique(payload, &RunMatchingJob::dedup_key_at(key))
                .await?;
            report.record(inserted);
        }
        Ok(report)
    }

    /// Current evaluation key of a pair, `None` while either side lacks a profile.
    async fn current_evaluation(&self, pair: PairKey) -> Result<Option<EvaluationKey>> {
        let profile_a = self.data.load_profile(pair.researcher_a_id()).await?;
        let profile_b = self.data.load_profile(pair.researcher_b_id()).await?;
        Ok(match (profile_a, profile_b) {
            (Some(a), Some(b)) => Some(EvaluationKey {
                pair,
                profile_version_a: a.profile_version,
                profile_version_b: b.profile_version,
            }),
            _ => None,
        })
    }

    /// A pool edge appeared between two researchers.
    ///
    /// Enqueues unconditionally; `run_matching` re-checks eligibility.
    pub async fn enqueue_for_new_pair(&self, user_a: Uuid, user_b: Uuid) -> Result<TriggerReport> {
        let pair = PairKey::new(user_a, user_b)?;
        let report = match self.current_evaluation(pair).await? {
            Some(key) => self.submit_evaluations(vec![key]).await?,
            None => {
                let mut report = TriggerReport::default();
                let inserted = self
                    .submit(JobPayload::RunMatching(RunMatchingJob::for_pair(pair)))
                    .await?;
                report.record(inserted);
                report
            }
        };
        info!(
            subsystem = "jobs",
            component = "triggers",
            op = "new_pair",
            researcher_a_id = %pair.researcher_a_id(),
            researcher_b_id = %pair.researcher_b_id(),
            enqueued = report.enqueued,
            "Pair trigger processed"
        );
        Ok(report)
    }

    /// A researcher's profile version changed: queue every pair involving
    /// them that is eligible at the new versions.
    pub async fn enqueue_for_profile_update(&self, user_id: Uuid) -> Result<TriggerReport> {
        let start = Instant::now();
        let candidates = self
            .resolver
            .compute_eligible_pairs(PairScope::User(user_id))
            .await?;
        let evaluations: Vec<EvaluationKey> =
            candidates.iter().map(PairCandidate::evaluation_key).collect();
        let report = self.submit_evaluations(evaluations).await?;
        info!(
            subsystem = "jobs",
            component = "triggers",
            op = "profile_update",
            user_id = %user_id,
            considered = report.considered,
            enqueued = report.enqueued,
            already_queued = report.already_queued,
            duration_ms = start.elapsed().as_millis() as u64,
            "Profile update trigger processed"
        );
        Ok(report)
    }

    /// Queue every globally eligible pair.
    pub async fn enqueue_scheduled_sweep(&self) -> Result<TriggerReport> {
        let start = Instant::now();
        let candidates = self.resolver.compute_eligible_pairs(PairScope::All).await?;
        let evaluations: Vec<EvaluationKey> =
            candidates.iter().map(PairCandidate::evaluation_key).collect();
        let report = self.submit_evaluations(evaluations).await?;
        info!(
            subsystem = "jobs",
            component = "triggers",
            op = "sweep",
            considered = report.considered,
            enqueued = report.enqueued,
            already_queued = report.already_queued,
            duration_ms = start.elapsed().as_millis() as u64,
            "Scheduled sweep enqueued"
        );
        Ok(report)
    }

    /// Queue a `monthly_refresh` for every researcher with a profile.
    pub async fn enqueue_monthly_refresh_all(&self) -> Result<TriggerReport> {
        let start = Instant::now();
        let users = self.data.list_profiled_users().await?;
        let mut report = TriggerReport::default();
        for user_id in users {
            let inserted = self
                .submit(JobPayload::MonthlyRefresh(MonthlyRefreshJob { user_id }))
                .await?;
            report.record(inserted);
        }
        info!(
            subsystem = "jobs",
            component = "triggers",
            op = "monthly_refresh",
            considered = report.considered,
            enqueued = report.enqueued,
            duration_ms = start.elapsed().as_millis() as u64,
            "Monthly refresh enqueued"
        );
        Ok(report)
    }

    pub async fn enqueue_profile_generation(
        &self,
        user_id: Uuid,
        orcid: impl Into<String>,
    ) -> Result<Option<Uuid>> {
        self.submit(JobPayload::GenerateProfile(GenerateProfileJob {
            user_id,
            orcid: orcid.into(),
        }))
        .await
    }

    pub async fn enqueue_pool_expansion(&self, user_id: Uuid) -> Result<Option<Uuid>> {
        self.submit(JobPayload::ExpandMatchPool(ExpandMatchPoolJob { user_id }))
            .await
    }

    /// Emails are never collapsed, so this always enqueues.
    pub async fn enqueue_email(&self, email: SendEmailJob) -> Result<Uuid> {
        self.queue.enqueue(JobPayload::SendEmail(email)).await
    }
}
