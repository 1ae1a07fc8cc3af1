//! Wiring of the pipeline's dependencies into triggers and handlers.

use std::sync::Arc;

use collab_core::{
    EligibilityResolver, EmailSender, JobPayload, JobQueue, MatchingDataSource, PoolExpander,
    ProfilePipeline, ProposalStore,
};
use collab_db::Database;
use collab_matching::MatchingEngine;

use crate::collaborators::HttpCollaborators;
use crate::dispatcher::HandlerSet;
use crate::handlers::{
    ExpandMatchPoolHandler, GenerateProfileHandler, MonthlyRefreshHandler, RunMatchingHandler,
    SendEmailHandler,
};
use crate::progress::ProfileProgressCache;
use crate::triggers::Triggers;

/// Everything the handlers and triggers depend on.
#[derive(Clone)]
pub struct PipelineServices {
    pub queue: Arc<dyn JobQueue<JobPayload>>,
    pub resolver: Arc<dyn EligibilityResolver>,
    pub data: Arc<dyn MatchingDataSource>,
    pub store: Arc<dyn ProposalStore>,
    pub engine: MatchingEngine,
    pub profiles: Arc<dyn ProfilePipeline>,
    pub pool: Arc<dyn PoolExpander>,
    pub email: Arc<dyn EmailSender>,
    pub progress: ProfileProgressCache,
}

impl PipelineServices {
    /// Production wiring: PostgreSQL storage, HTTP collaborators.
    pub fn from_database(
        db: &Database,
        engine: MatchingEngine,
        collaborators: HttpCollaborators,
        progress: ProfileProgressCache,
    ) -> Self {
        let collaborators = Arc::new(collaborators);
        Self {
            queue: Arc::new(db.jobs.clone()),
            resolver: Arc::new(db.resolver.clone()),
            data: Arc::new(db.matching_data.clone()),
            store: Arc::new(db.proposals.clone()),
            engine,
            profiles: collaborators.clone(),
            pool: collaborators.clone(),
            email: collaborators,
            progress,
        }
    }

    pub fn triggers(&self) -> Triggers {
        Triggers::new(self.queue.clone(), self.resolver.clone(), self.data.clone())
    }

    /// One handler per payload variant.
    pub fn handler_set(&self) -> HandlerSet {
        let triggers = self.triggers();
        HandlerSet {
            generate_profile: Arc::new(GenerateProfileHandler::new(
                self.profiles.clone(),
                self.progress.clone(),
                triggers.clone(),
            )),
            run_matching: Arc::new(RunMatchingHandler::new(
                self.resolver.clone(),
                self.data.clone(),
                self.engine.clone(),
                self.store.clone(),
            )),
            expand_match_pool: Arc::new(ExpandMatchPoolHandler::new(
                self.pool.clone(),
                triggers.clone(),
            )),
            monthly_refresh: Arc::new(MonthlyRefreshHandler::new(
                self.profiles.clone(),
                triggers,
            )),
            send_email: Arc::new(SendEmailHandler::new(self.email.clone())),
        }
    }
}
