//! Core traits for the matching pipeline.
//!
//! These traits define the seams between the pipeline stages, so each stage
//! can run against PostgreSQL in production and against in-memory fakes in
//! tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::jobs::{CompleteOutcome, FailOutcome, QueuePayload, QueueStats, QueuedJob, SendEmailJob};
use crate::models::*;
use crate::pair::{PairCandidate, PairKey, PairScope, PoolDirection};

// =============================================================================
// JOB QUEUE
// =============================================================================

/// Durable at-least-once work queue, generic over its payload type.
#[async_trait]
pub trait JobQueue<P: QueuePayload>: Send + Sync {
    /// Persist a new pending job, due immediately.
    async fn enqueue(&self, payload: P) -> Result<Uuid>;

    /// Enqueue unless a pending or processing job with the same key exists.
    ///
    /// Returns `None` when an existing live job absorbed the request.
    async fn enqueue_unique(&self, payload: P, dedup_key: &str) -> Result<Option<Uuid>>;

    /// Atomically claim up to `limit` due jobs for `worker_id`.
    ///
    /// Two concurrent callers never receive the same job.
    async fn claim_next(&self, worker_id: &str, limit: usize) -> Result<Vec<QueuedJob<P>>>;

    /// Mark a job completed, provided `worker_id` still holds its lease.
    ///
    /// A caller whose lease expired (and was possibly reclaimed by another
    /// worker) gets `LeaseLost` and the job is left as it is.
    async fn complete(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: Option<JsonValue>,
    ) -> Result<CompleteOutcome>;

    /// Record a failed attempt: back off and retry, or dead-letter. Fenced on
    /// the lease like [`JobQueue::complete`].
    async fn fail(&self, job_id: Uuid, worker_id: &str, error: &str) -> Result<FailOutcome>;

    /// Get a job by ID.
    async fn get(&self, job_id: Uuid) -> Result<Option<QueuedJob<P>>>;

    /// Count jobs per status.
    async fn stats(&self) -> Result<QueueStats>;
}

// =============================================================================
// ELIGIBILITY
// =============================================================================

/// Computes which pairs need (re)evaluation at their current profile versions.
///
/// The result is a pure function of database state: two calls with no
/// intervening writes return the same set.
#[async_trait]
pub trait EligibilityResolver: Send + Sync {
    async fn compute_eligible_pairs(&self, scope: PairScope) -> Result<Vec<PairCandidate>>;
}

// =============================================================================
// MATCHING
// =============================================================================

/// Read access to the data a pair evaluation needs.
#[async_trait]
pub trait MatchingDataSource: Send + Sync {
    /// Current profile of a researcher, `None` if they have none.
    async fn load_profile(&self, user_id: Uuid) -> Result<Option<ResearcherProfile>>;

    /// Most recent publications first, at most `limit`.
    async fn load_publications(&self, user_id: Uuid, limit: usize) -> Result<Vec<Publication>>;

    /// Proposals already stored for a pair, at any profile versions.
    async fn load_existing_proposals(&self, pair: PairKey) -> Result<Vec<ExistingProposal>>;

    /// Pool direction of a pair, `None` if no edge connects them.
    async fn pool_direction(&self, pair: PairKey) -> Result<Option<PoolDirection>>;

    /// Every researcher that currently has a profile.
    async fn list_profiled_users(&self) -> Result<Vec<Uuid>>;
}

/// Transactional persistence of one evaluation.
#[async_trait]
pub trait ProposalStore: Send + Sync {
    /// Insert the surviving proposals and exactly one matching result.
    ///
    /// Losing a race on the evaluation tuple is a benign no-op reported as
    /// `already_evaluated`, never an error.
    async fn store_proposals_and_result(
        &self,
        context: &PairContext,
        result: &GenerationResult,
    ) -> Result<StoreOutcome>;
}

// =============================================================================
// INFERENCE
// =============================================================================

/// Backend for text generation (LLM).
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate text with system context.
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

// =============================================================================
// EXTERNAL COLLABORATORS
// =============================================================================

/// Outcome of a profile generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileGenerationReport {
    pub profile_version: i32,
    pub publication_count: i32,
}

/// Outcome of a monthly profile refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub previous_version: Option<i32>,
    pub current_version: Option<i32>,
}

impl RefreshReport {
    /// Whether the refresh produced a new profile version.
    pub fn changed(&self) -> bool {
        match (self.previous_version, self.current_version) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(before), Some(after)) => after != before,
        }
    }
}

/// The profile ingestion pipeline owned by the surrounding application.
#[async_trait]
pub trait ProfilePipeline: Send + Sync {
    /// Build a researcher's profile from their bibliographic record.
    async fn generate_profile(&self, user_id: Uuid, orcid: &str) -> Result<ProfileGenerationReport>;

    /// Re-fetch publications and regenerate the profile if they changed.
    async fn refresh_profile(&self, user_id: Uuid) -> Result<RefreshReport>;
}

/// A directed pool edge created by pool expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEdge {
    pub user_id: Uuid,
    pub target_user_id: Uuid,
    pub source: PoolSource,
}

/// The pool/settings service: applies affiliation and all-users rules.
#[async_trait]
pub trait PoolExpander: Send + Sync {
    /// Add the edges a newly profiled researcher's rules imply; returns new edges only.
    async fn expand_match_pool(&self, user_id: Uuid) -> Result<Vec<PoolEdge>>;
}

/// Email delivery collaborator.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, email: &SendEmailJob) -> Result<()>;
}
