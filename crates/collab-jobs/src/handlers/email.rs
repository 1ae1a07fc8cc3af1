//! `send_email`: hand the job to the email collaborator.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use collab_core::{EmailSender, Result, SendEmailJob};

use crate::handler::{HandlerOutcome, JobContext, JobHandler};

pub struct SendEmailHandler {
    sender: Arc<dyn EmailSender>,
}

impl SendEmailHandler {
    pub fn new(sender: Arc<dyn EmailSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl JobHandler<SendEmailJob> for SendEmailHandler {
    async fn handle(&self, ctx: &JobContext, job: &SendEmailJob) -> Result<HandlerOutcome> {
        self.sender.send(job).await?;
        debug!(
            subsystem = "jobs",
            component = "send_email",
            job_id = %ctx.job_id,
            user_id = %job.user_id,
            template = %job.template,
            "Email handed off"
        );
        Ok(HandlerOutcome::Completed(None))
    }
}
