//! In-memory stand-in for the PostgreSQL storage layer.
//!
//! Follows the `collab-db` semantics (claim exclusivity, lease fencing and
//! expiry, backoff, dead-lettering, the evaluation uniqueness constraint)
//! behind a single mutex, so handler and worker behaviour can be exercised
//! without a database. The `collab-db` integration tests cover the real
//! queries.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::Notify;
use uuid::Uuid;

use collab_core::{
    new_v7, CollaborationProposal, CompleteOutcome, EligibilityResolver, Error, ExistingProposal,
    FailOutcome,
    GenerationResult, JobPayload, JobQueue, JobStatus, MatchingDataSource, MatchingResult,
    PairCandidate, PairContext, PairKey, PairScope, PoolDirection, ProposalStore, Publication,
    QueuePayload, QueueStats, QueuedJob, ResearcherProfile, Result, StoreOutcome,
};
use collab_db::QueueConfig;

#[derive(Debug, Clone)]
struct StoredJob {
    job: QueuedJob<JobPayload>,
    dedup_key: Option<String>,
}

impl StoredJob {
    fn is_live(&self) -> bool {
        matches!(
            self.job.status,
            JobStatus::Pending | JobStatus::Processing
        )
    }

    fn is_held_by(&self, worker_id: &str) -> bool {
        self.job.status == JobStatus::Processing
            && self.job.locked_by.as_deref() == Some(worker_id)
    }
}

#[derive(Default)]
struct State {
    /// user id → allow incoming proposals
    users: HashMap<Uuid, bool>,
    profiles: HashMap<Uuid, ResearcherProfile>,
    publications: HashMap<Uuid, Vec<Publication>>,
    edges: HashSet<(Uuid, Uuid)>,
    results: Vec<MatchingResult>,
    proposals: Vec<CollaborationProposal>,
    jobs: Vec<StoredJob>,
}

impl State {
    fn edge(&self, from: Uuid, to: Uuid) -> bool {
        self.edges.contains(&(from, to))
    }

    fn has_result(&self, pair: PairKey, version_a: i32, version_b: i32) -> bool {
        self.results.iter().any(|r| {
            r.researcher_a_id == pair.researcher_a_id()
                && r.researcher_b_id == pair.researcher_b_id()
                && r.profile_version_a == version_a
                && r.profile_version_b == version_b
        })
    }

    fn job_mut(&mut self, job_id: Uuid) -> Option<&mut StoredJob> {
        self.jobs.iter_mut().find(|j| j.job.id == job_id)
    }
}

/// Shared in-memory store. Clones share state.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    config: QueueConfig,
    notify: Arc<Notify>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl MemoryStore {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            config,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Notified on every enqueue, like [`collab_db::PgJobQueue::job_notify`].
    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // --- seeding -----------------------------------------------------------

    pub fn add_user(&self, user_id: Uuid, allow_incoming_proposals: bool) {
        self.lock().users.insert(user_id, allow_incoming_proposals);
    }

    /// Insert or replace a profile; the owning user is created if missing.
    pub fn put_profile(&self, profile: ResearcherProfile) {
        let mut state = self.lock();
        state.users.entry(profile.user_id).or_insert(false);
        state.profiles.insert(profile.user_id, profile);
    }

    /// Increment a profile's version, as the profile service does on edit.
    pub fn bump_profile_version(&self, user_id: Uuid) -> Option<i32> {
        let mut state = self.lock();
        let profile = state.profiles.get_mut(&user_id)?;
        profile.profile_version += 1;
        profile.updated_at = Utc::now();
        Some(profile.profile_version)
    }

    pub fn remove_profile(&self, user_id: Uuid) {
        self.lock().profiles.remove(&user_id);
    }

    pub fn add_publication(&self, publication: Publication) {
        self.lock()
            .publications
            .entry(publication.user_id)
            .or_default()
            .push(publication);
    }

    pub fn add_pool_entry(&self, user_id: Uuid, target_user_id: Uuid) {
        self.lock().edges.insert((user_id, target_user_id));
    }

    pub fn remove_pool_entry(&self, user_id: Uuid, target_user_id: Uuid) {
        self.lock().edges.remove(&(user_id, target_user_id));
    }

    // --- inspection --------------------------------------------------------

    pub fn results_for_pair(&self, pair: PairKey) -> Vec<MatchingResult> {
        self.lock()
            .results
            .iter()
            .filter(|r| {
                r.researcher_a_id == pair.researcher_a_id()
                    && r.researcher_b_id == pair.researcher_b_id()
            })
            .cloned()
            .collect()
    }

    pub fn proposals_for_pair(&self, pair: PairKey) -> Vec<CollaborationProposal> {
        self.lock()
            .proposals
            .iter()
            .filter(|p| {
                p.researcher_a_id == pair.researcher_a_id()
                    && p.researcher_b_id == pair.researcher_b_id()
            })
            .cloned()
            .collect()
    }

    /// Snapshot of every job in insertion order.
    pub fn jobs(&self) -> Vec<QueuedJob<JobPayload>> {
        self.lock().jobs.iter().map(|j| j.job.clone()).collect()
    }

    /// Make a backed-off job due now.
    pub fn make_due(&self, job_id: Uuid) {
        if let Some(stored) = self.lock().job_mut(job_id) {
            stored.job.next_run_at = Utc::now();
        }
    }

    /// Expire the lease of a processing job, as if its worker crashed.
    pub fn expire_lease(&self, job_id: Uuid) {
        if let Some(stored) = self.lock().job_mut(job_id) {
            if stored.job.status == JobStatus::Processing {
                stored.job.locked_until = Some(Utc::now() - ChronoDuration::seconds(1));
            }
        }
    }

    fn reap_expired_leases(state: &mut State) {
        let now = Utc::now();
        for stored in state.jobs.iter_mut() {
            let job = &mut stored.job;
            let expired = job.status == JobStatus::Processing
                && job.locked_until.is_some_and(|until| until < now);
            if !expired {
                continue;
            }
            job.attempts += 1;
            job.status = if job.attempts >= job.max_attempts {
                JobStatus::Dead
            } else {
                JobStatus::Pending
            };
            job.next_run_at = now;
            job.last_error = Some(format!(
                "lease expired while held by {}",
                job.locked_by.as_deref().unwrap_or("unknown worker")
            ));
            job.locked_by = None;
            job.locked_until = None;
        }
    }
}

fn push_job(
    state: &mut State,
    payload: JobPayload,
    max_attempts: i32,
    dedup_key: Option<String>,
) -> Uuid {
    let now = Utc::now();
    let id = new_v7();
    state.jobs.push(StoredJob {
        job: QueuedJob {
            id,
            job_type: payload.job_type().to_string(),
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts,
            next_run_at: now,
            locked_by: None,
            locked_until: None,
            last_error: None,
            created_at: now,
        },
        dedup_key,
    });
    id
}

#[async_trait]
impl JobQueue<JobPayload> for MemoryStore {
    async fn enqueue(&self, payload: JobPayload) -> Result<Uuid> {
        let id = push_job(&mut self.lock(), payload, self.config.max_attempts, None);
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn enqueue_unique(&self, payload: JobPayload, dedup_key: &str) -> Result<Option<Uuid>> {
        let id = {
            let mut state = self.lock();
            let exists = state
                .jobs
                .iter()
                .any(|j| j.is_live() && j.dedup_key.as_deref() == Some(dedup_key));
            if exists {
                None
            } else {
                Some(push_job(
                    &mut state,
                    payload,
                    self.config.max_attempts,
                    Some(dedup_key.to_string()),
                ))
            }
        };
        if id.is_some() {
            self.notify.notify_waiters();
        }
        Ok(id)
    }

    async fn claim_next(&self, worker_id: &str, limit: usize) -> Result<Vec<QueuedJob<JobPayload>>> {
        let mut state = self.lock();
        Self::reap_expired_leases(&mut state);

        let now = Utc::now();
        let mut due: Vec<usize> = state
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| j.job.status == JobStatus::Pending && j.job.next_run_at <= now)
            .map(|(i, _)| i)
            .collect();
        due.sort_by(|&x, &y| {
            let (a, b) = (&state.jobs[x].job, &state.jobs[y].job);
            a.next_run_at
                .cmp(&b.next_run_at)
                .then(a.created_at.cmp(&b.created_at))
        });

        let lease = ChronoDuration::from_std(self.config.lock_duration)
            .map_err(|e| Error::Config(format!("lock duration out of range: {}", e)))?;
        let mut claimed = Vec::new();
        for index in due.into_iter().take(limit) {
            let job = &mut state.jobs[index].job;
            job.status = JobStatus::Processing;
            job.locked_by = Some(worker_id.to_string());
            job.locked_until = Some(now + lease);
            claimed.push(job.clone());
        }
        Ok(claimed)
    }

    async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        _result: Option<JsonValue>,
    ) -> Result<CompleteOutcome> {
        let mut state = self.lock();
        let stored = state
            .job_mut(job_id)
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;
        if !stored.is_held_by(worker_id) {
            return Ok(CompleteOutcome::LeaseLost);
        }
        stored.job.status = JobStatus::Completed;
        stored.job.locked_by = None;
        stored.job.locked_until = None;
        Ok(CompleteOutcome::Completed)
    }

    async fn fail(&self, job_id: Uuid, worker_id: &str, error: &str) -> Result<FailOutcome> {
        let mut state = self.lock();
        let stored = state
            .job_mut(job_id)
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;
        if !stored.is_held_by(worker_id) {
            return Ok(FailOutcome::LeaseLost);
        }

        let job = &mut stored.job;
        job.attempts += 1;
        job.last_error = Some(error.to_string());
        job.locked_by = None;
        job.locked_until = None;
        if job.attempts >= job.max_attempts {
            job.status = JobStatus::Dead;
            return Ok(FailOutcome::Dead {
                attempts: job.attempts,
            });
        }

        job.status = JobStatus::Pending;
        job.next_run_at =
            Utc::now() + ChronoDuration::milliseconds(self.config.backoff_for(job.attempts));
        Ok(FailOutcome::Retrying {
            attempts: job.attempts,
            next_run_at: job.next_run_at,
        })
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<QueuedJob<JobPayload>>> {
        Ok(self
            .lock()
            .jobs
            .iter()
            .find(|j| j.job.id == job_id)
            .map(|j| j.job.clone()))
    }

    async fn stats(&self) -> Result<QueueStats> {
        let state = self.lock();
        let mut stats = QueueStats::default();
        for stored in &state.jobs {
            match stored.job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Dead => stats.dead += 1,
            }
            stats.total += 1;
        }
        Ok(stats)
    }
}

#[async_trait]
impl EligibilityResolver for MemoryStore {
    async fn compute_eligible_pairs(&self, scope: PairScope) -> Result<Vec<PairCandidate>> {
        let state = self.lock();

        // (a, b) → (a selected b, b selected a), over counted edges only.
        let mut pairs: HashMap<PairKey, (bool, bool)> = HashMap::new();
        for &(src, dst) in &state.edges {
            let Ok(pair) = PairKey::new(src, dst) else {
                continue;
            };
            let in_scope = match scope {
                PairScope::All => true,
                PairScope::User(user_id) => pair.contains(user_id),
                PairScope::Pair(wanted) => pair == wanted,
            };
            let Some(&allow_incoming) = state.users.get(&dst) else {
                continue;
            };
            if !in_scope || !(allow_incoming || state.edge(dst, src)) {
                continue;
            }
            let entry = pairs.entry(pair).or_default();
            if src == pair.researcher_a_id() {
                entry.0 = true;
            } else {
                entry.1 = true;
            }
        }

        let mut candidates: Vec<PairCandidate> = pairs
            .into_iter()
            .filter_map(|(pair, (a_selected_b, b_selected_a))| {
                let profile_a = state.profiles.get(&pair.researcher_a_id())?;
                let profile_b = state.profiles.get(&pair.researcher_b_id())?;
                let direction = PoolDirection::from_edges(a_selected_b, b_selected_a)?;
                if state.has_result(pair, profile_a.profile_version, profile_b.profile_version) {
                    return None;
                }
                Some(PairCandidate {
                    researcher_a_id: pair.researcher_a_id(),
                    researcher_b_id: pair.researcher_b_id(),
                    profile_version_a: profile_a.profile_version,
                    profile_version_b: profile_b.profile_version,
                    direction,
                })
            })
            .collect();
        candidates.sort_by_key(|c| (c.researcher_a_id, c.researcher_b_id));
        Ok(candidates)
    }
}

#[async_trait]
impl MatchingDataSource for MemoryStore {
    async fn load_profile(&self, user_id: Uuid) -> Result<Option<ResearcherProfile>> {
        Ok(self.lock().profiles.get(&user_id).cloned())
    }

    async fn load_publications(&self, user_id: Uuid, limit: usize) -> Result<Vec<Publication>> {
        let state = self.lock();
        let mut publications = state
            .publications
            .get(&user_id)
            .cloned()
            .unwrap_or_default();
        // Most recent first, undated last; ties keep the latest insertion first.
        publications.reverse();
        publications.sort_by(|a, b| b.year.cmp(&a.year));
        publications.truncate(limit);
        Ok(publications)
    }

    async fn load_existing_proposals(&self, pair: PairKey) -> Result<Vec<ExistingProposal>> {
        Ok(self
            .proposals_for_pair(pair)
            .into_iter()
            .map(|p| ExistingProposal {
                id: p.id,
                profile_version_a: p.profile_version_a,
                profile_version_b: p.profile_version_b,
                title: p.title,
                anchoring_publication_ids: p.anchoring_publication_ids,
                content_hash: p.content_hash,
            })
            .collect())
    }

    async fn pool_direction(&self, pair: PairKey) -> Result<Option<PoolDirection>> {
        let state = self.lock();
        Ok(PoolDirection::from_edges(
            state.edge(pair.researcher_a_id(), pair.researcher_b_id()),
            state.edge(pair.researcher_b_id(), pair.researcher_a_id()),
        ))
    }

    async fn list_profiled_users(&self) -> Result<Vec<Uuid>> {
        let mut users: Vec<Uuid> = self.lock().profiles.keys().copied().collect();
        users.sort();
        Ok(users)
    }
}

#[async_trait]
impl ProposalStore for MemoryStore {
    async fn store_proposals_and_result(
        &self,
        context: &PairContext,
        result: &GenerationResult,
    ) -> Result<StoreOutcome> {
        let key = context.evaluation_key();
        let (a, b) = (key.pair.researcher_a_id(), key.pair.researcher_b_id());
        let mut state = self.lock();

        if state.has_result(key.pair, key.profile_version_a, key.profile_version_b) {
            return Ok(StoreOutcome {
                stored: 0,
                already_evaluated: true,
            });
        }

        let now = Utc::now();
        state.results.push(MatchingResult {
            id: new_v7(),
            researcher_a_id: a,
            researcher_b_id: b,
            profile_version_a: key.profile_version_a,
            profile_version_b: key.profile_version_b,
            outcome: result.outcome(),
            proposal_count: result.proposals.len() as i32,
            discarded_count: result.discarded as i32,
            deduplicated_count: result.deduplicated as i32,
            llm_model: Some(result.model.clone()),
            evaluated_at: now,
        });

        let (visibility_a, visibility_b) = context.direction.initial_visibility();
        let mut stored = 0;
        for draft in &result.proposals {
            let duplicate = state.proposals.iter().any(|p| {
                p.researcher_a_id == a
                    && p.researcher_b_id == b
                    && p.profile_version_a == key.profile_version_a
                    && p.profile_version_b == key.profile_version_b
                    && p.content_hash == draft.fingerprint
            });
            if duplicate {
                continue;
            }
            state.proposals.push(CollaborationProposal {
                id: new_v7(),
                researcher_a_id: a,
                researcher_b_id: b,
                profile_version_a: key.profile_version_a,
                profile_version_b: key.profile_version_b,
                title: draft.title.clone(),
                collaboration_type: draft.collaboration_type,
                scientific_question: draft.scientific_question.clone(),
                one_line_summary_a: draft.one_line_summary_a.clone(),
                one_line_summary_b: draft.one_line_summary_b.clone(),
                detailed_rationale: draft.detailed_rationale.clone(),
                lab_a_contributions: draft.lab_a_contributions.clone(),
                lab_b_contributions: draft.lab_b_contributions.clone(),
                lab_a_benefits: draft.lab_a_benefits.clone(),
                lab_b_benefits: draft.lab_b_benefits.clone(),
                proposed_first_experiment: draft.proposed_first_experiment.clone(),
                anchoring_publication_ids: draft.anchoring_publication_ids.clone(),
                confidence_tier: draft.confidence_tier,
                reasoning: draft.reasoning.clone(),
                visibility_a,
                visibility_b,
                llm_model: result.model.clone(),
                content_hash: draft.fingerprint.clone(),
                created_at: now,
            });
            stored += 1;
        }

        Ok(StoreOutcome {
            stored,
            already_evaluated: false,
        })
    }
}
