//! Job handler trait and execution context.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use collab_core::{JobPayload, QueuedJob, Result};

/// Context provided to job handlers.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    /// Attempts already spent before this execution.
    pub attempts: i32,
    pub max_attempts: i32,
    /// Lock owner that claimed the job.
    pub worker_id: String,
}

impl JobContext {
    pub fn for_job(job: &QueuedJob<JobPayload>, worker_id: &str) -> Self {
        Self {
            job_id: job.id,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            worker_id: worker_id.to_string(),
        }
    }

    /// Whether a failure of this execution dead-letters the job.
    pub fn is_last_attempt(&self) -> bool {
        self.attempts + 1 >= self.max_attempts
    }
}

/// Normal outcome of a handler. Both variants complete the job.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// Work done, with optional result data stored on the job.
    Completed(Option<JsonValue>),
    /// The unit of work no longer applies (e.g. the pair became ineligible).
    Skipped(String),
}

impl HandlerOutcome {
    pub fn completed(value: JsonValue) -> Self {
        Self::Completed(Some(value))
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }

    /// Result data persisted with the completed job.
    pub fn into_result(self) -> Option<JsonValue> {
        match self {
            Self::Completed(value) => value,
            Self::Skipped(reason) => Some(serde_json::json!({ "skipped": reason })),
        }
    }
}

/// Handler for one payload variant. Errors are passed to the queue's
/// backoff/dead-letter path; handlers must tolerate re-execution.
#[async_trait]
pub trait JobHandler<J>: Send + Sync {
    async fn handle(&self, ctx: &JobContext, job: &J) -> Result<HandlerOutcome>;
}
