//! `expand_match_pool`: apply pool rules, queue each new pair.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use collab_core::{ExpandMatchPoolJob, PoolExpander, Result};

use crate::handler::{HandlerOutcome, JobContext, JobHandler};
use crate::triggers::{TriggerReport, Triggers};

pub struct ExpandMatchPoolHandler {
    expander: Arc<dyn PoolExpander>,
    triggers: Triggers,
}

impl ExpandMatchPoolHandler {
    pub fn new(expander: Arc<dyn PoolExpander>, triggers: Triggers) -> Self {
        Self { expander, triggers }
    }
}

#[async_trait]
impl JobHandler<ExpandMatchPoolJob> for ExpandMatchPoolHandler {
    async fn handle(&self, ctx: &JobContext, job: &ExpandMatchPoolJob) -> Result<HandlerOutcome> {
        let edges = self.expander.expand_match_pool(job.user_id).await?;

        let mut total = TriggerReport::default();
        for edge in &edges {
            if edge.user_id == edge.target_user_id {
                warn!(
                    subsystem = "jobs",
                    component = "expand_match_pool",
                    job_id = %ctx.job_id,
                    user_id = %edge.user_id,
                    "Ignoring self-referencing pool edge"
                );
                continue;
            }
            let report = self
                .triggers
                .enqueue_for_new_pair(edge.user_id, edge.target_user_id)
                .await?;
            total.considered += report.considered;
            total.enqueued += report.enqueued;
            total.already_queued += report.already_queued;
        }

        info!(
            subsystem = "jobs",
            component = "expand_match_pool",
            user_id = %job.user_id,
            new_edges = edges.len(),
            enqueued = total.enqueued,
            "Match pool expanded"
        );
        Ok(HandlerOutcome::completed(json!({
            "new_edges": edges.len(),
            "matching": total,
        })))
    }
}
