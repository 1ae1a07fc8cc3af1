//! `run_matching`: re-check, assemble, generate, store.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use collab_core::{
    EligibilityResolver, MatchingDataSource, PairScope, ProposalStore, Result, RunMatchingJob,
};
use collab_matching::MatchingEngine;

use crate::handler::{HandlerOutcome, JobContext, JobHandler};

/// Evaluates one researcher pair.
///
/// The model call happens between two short reads and one short write; no
/// transaction is open while it runs. Re-execution after a crash is harmless:
/// either the resolver no longer reports the pair, or the store reports the
/// evaluation as already recorded.
pub struct RunMatchingHandler {
    resolver: Arc<dyn EligibilityResolver>,
    data: Arc<dyn MatchingDataSource>,
    engine: MatchingEngine,
    store: Arc<dyn ProposalStore>,
}

impl RunMatchingHandler {
    pub fn new(
        resolver: Arc<dyn EligibilityResolver>,
        data: Arc<dyn MatchingDataSource>,
        engine: MatchingEngine,
        store: Arc<dyn ProposalStore>,
    ) -> Self {
        Self {
            resolver,
            data,
            engine,
            store,
        }
    }
}

#[async_trait]
impl JobHandler<RunMatchingJob> for RunMatchingHandler {
    async fn handle(&self, ctx: &JobContext, job: &RunMatchingJob) -> Result<HandlerOutcome> {
        let start = Instant::now();
        let pair = job.pair()?;

        let eligible = self
            .resolver
            .compute_eligible_pairs(PairScope::Pair(pair))
            .await?;
        let Some(candidate) = eligible.into_iter().find(|c| c.pair() == pair) else {
            debug!(
                subsystem = "jobs",
                component = "run_matching",
                job_id = %ctx.job_id,
                pair = %pair,
                "Pair no longer eligible"
            );
            return Ok(HandlerOutcome::skipped(
                "pair not eligible at current profile versions",
            ));
        };

        let Some(context) = self
            .engine
            .assemble_context_for_pair(self.data.as_ref(), pair)
            .await?
        else {
            return Ok(HandlerOutcome::skipped("pair context unavailable"));
        };

        let key = context.evaluation_key();
        if key != candidate.evaluation_key() {
            // A profile moved between the re-check and the read; the store
            // keys on what the model actually saw.
            debug!(
                subsystem = "jobs",
                component = "run_matching",
                pair = %pair,
                checked_a = candidate.profile_version_a,
                checked_b = candidate.profile_version_b,
                read_a = key.profile_version_a,
                read_b = key.profile_version_b,
                "Profile versions changed during evaluation"
            );
        }

        let result = self.engine.generate_proposals_for_pair(&context).await?;
        let stored = self
            .store
            .store_proposals_and_result(&context, &result)
            .await?;

        info!(
            subsystem = "jobs",
            component = "run_matching",
            job_id = %ctx.job_id,
            researcher_a_id = %pair.researcher_a_id(),
            researcher_b_id = %pair.researcher_b_id(),
            profile_version_a = key.profile_version_a,
            profile_version_b = key.profile_version_b,
            outcome = result.outcome().as_str(),
            stored = stored.stored,
            already_evaluated = stored.already_evaluated,
            duration_ms = start.elapsed().as_millis() as u64,
            "Pair evaluated"
        );

        Ok(HandlerOutcome::completed(json!({
            "outcome": result.outcome().as_str(),
            "profile_version_a": key.profile_version_a,
            "profile_version_b": key.profile_version_b,
            "stored": stored.stored,
            "discarded": result.discarded,
            "deduplicated": result.deduplicated,
            "already_evaluated": stored.already_evaluated,
            "model": result.model,
        })))
    }
}
