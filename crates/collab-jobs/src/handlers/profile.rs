//! Profile pipeline handlers: `generate_profile` and `monthly_refresh`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use collab_core::{GenerateProfileJob, MonthlyRefreshJob, ProfilePipeline, Result};

use crate::handler::{HandlerOutcome, JobContext, JobHandler};
use crate::progress::{ProfileProgressCache, ProgressStage};
use crate::triggers::Triggers;

/// Builds a profile through the external pipeline, then queues pool
/// expansion and matching for the new version.
///
/// Progress is mirrored into the best-effort cache for UI polling; only the
/// final failed attempt reports an error stage.
pub struct GenerateProfileHandler {
    pipeline: Arc<dyn ProfilePipeline>,
    progress: ProfileProgressCache,
    triggers: Triggers,
}

impl GenerateProfileHandler {
    pub fn new(
        pipeline: Arc<dyn ProfilePipeline>,
        progress: ProfileProgressCache,
        triggers: Triggers,
    ) -> Self {
        Self {
            pipeline,
            progress,
            triggers,
        }
    }

    async fn run(&self, job: &GenerateProfileJob) -> Result<HandlerOutcome> {
        let user_id = job.user_id;
        self.progress
            .set(user_id, ProgressStage::GeneratingProfile)
            .await;
        let report = self.pipeline.generate_profile(user_id, &job.orcid).await?;

        self.progress
            .set(user_id, ProgressStage::ExpandingMatchPool)
            .await;
        let expansion = self.triggers.enqueue_pool_expansion(user_id).await?;
        let matching = self.triggers.enqueue_for_profile_update(user_id).await?;

        self.progress.set(user_id, ProgressStage::Complete).await;
        info!(
            subsystem = "jobs",
            component = "generate_profile",
            user_id = %user_id,
            profile_version = report.profile_version,
            publication_count = report.publication_count,
            matching_enqueued = matching.enqueued,
            "Profile generated"
        );

        Ok(HandlerOutcome::completed(json!({
            "profile_version": report.profile_version,
            "publication_count": report.publication_count,
            "pool_expansion_enqueued": expansion.is_some(),
            "matching": matching,
        })))
    }

    async fn record_failure(&self, ctx: &JobContext, user_id: Uuid, error: &str) {
        let stage = if ctx.is_last_attempt() {
            ProgressStage::Error(error.to_string())
        } else {
            ProgressStage::Queued
        };
        self.progress.set(user_id, stage).await;
    }
}

#[async_trait]
impl JobHandler<GenerateProfileJob> for GenerateProfileHandler {
    async fn handle(&self, ctx: &JobContext, job: &GenerateProfileJob) -> Result<HandlerOutcome> {
        match self.run(job).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.record_failure(ctx, job.user_id, &e.to_string()).await;
                Err(e)
            }
        }
    }
}

/// Refreshes a profile; a new version re-queues the researcher's pairs.
pub struct MonthlyRefreshHandler {
    pipeline: Arc<dyn ProfilePipeline>,
    triggers: Triggers,
}

impl MonthlyRefreshHandler {
    pub fn new(pipeline: Arc<dyn ProfilePipeline>, triggers: Triggers) -> Self {
        Self { pipeline, triggers }
    }
}

#[async_trait]
impl JobHandler<MonthlyRefreshJob> for MonthlyRefreshHandler {
    async fn handle(&self, ctx: &JobContext, job: &MonthlyRefreshJob) -> Result<HandlerOutcome> {
        let report = self.pipeline.refresh_profile(job.user_id).await?;

        if report.current_version.is_none() {
            warn!(
                subsystem = "jobs",
                component = "monthly_refresh",
                job_id = %ctx.job_id,
                user_id = %job.user_id,
                "Refresh left the researcher without a profile"
            );
        }
        if !report.changed() {
            return Ok(HandlerOutcome::completed(json!({
                "changed": false,
                "current_version": report.current_version,
            })));
        }

        let matching = self.triggers.enqueue_for_profile_update(job.user_id).await?;
        info!(
            subsystem = "jobs",
            component = "monthly_refresh",
            user_id = %job.user_id,
            previous_version = ?report.previous_version,
            current_version = ?report.current_version,
            matching_enqueued = matching.enqueued,
            "Profile refreshed with changes"
        );
        Ok(HandlerOutcome::completed(json!({
            "changed": true,
            "previous_version": report.previous_version,
            "current_version": report.current_version,
            "matching": matching,
        })))
    }
}
