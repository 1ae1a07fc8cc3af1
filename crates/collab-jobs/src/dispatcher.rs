//! Exhaustive routing of claimed jobs to their handlers.
//!
//! [`HandlerSet`] has one field per [`JobPayload`] variant and
//! [`Dispatcher::dispatch`] matches without a wildcard arm, so a new payload
//! variant does not compile until a handler is wired for it.

use std::sync::Arc;

use collab_core::{
    ExpandMatchPoolJob, GenerateProfileJob, JobPayload, MonthlyRefreshJob, Result,
    RunMatchingJob, SendEmailJob,
};

use crate::handler::{HandlerOutcome, JobContext, JobHandler};

/// One handler per payload variant.
#[derive(Clone)]
pub struct HandlerSet {
    pub generate_profile: Arc<dyn JobHandler<GenerateProfileJob>>,
    pub run_matching: Arc<dyn JobHandler<RunMatchingJob>>,
    pub expand_match_pool: Arc<dyn JobHandler<ExpandMatchPoolJob>>,
    pub monthly_refresh: Arc<dyn JobHandler<MonthlyRefreshJob>>,
    pub send_email: Arc<dyn JobHandler<SendEmailJob>>,
}

/// Routes payloads to the [`HandlerSet`].
#[derive(Clone)]
pub struct Dispatcher {
    handlers: HandlerSet,
}

impl Dispatcher {
    pub fn new(handlers: HandlerSet) -> Self {
        Self { handlers }
    }

    pub async fn dispatch(&self, ctx: &JobContext, payload: &JobPayload) -> Result<HandlerOutcome> {
        match payload {
            JobPayload::GenerateProfile(job) => self.handlers.generate_profile.handle(ctx, job).await,
            JobPayload::RunMatching(job) => self.handlers.run_matching.handle(ctx, job).await,
            JobPayload::ExpandMatchPool(job) => {
                self.handlers.expand_match_pool.handle(ctx, job).await
            }
            JobPayload::MonthlyRefresh(job) => self.handlers.monthly_refresh.handle(ctx, job).await,
            JobPayload::SendEmail(job) => self.handlers.send_email.handle(ctx, job).await,
        }
    }
}
