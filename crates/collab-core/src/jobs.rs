//! Job payloads and queue records.
//!
//! The payload set is closed: [`JobPayload`] is the only type the pipeline
//! enqueues, and every consumer matches on it exhaustively.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::pair::{EvaluationKey, PairKey};
use crate::{Error, Result};

/// A payload type storable in the durable job queue.
pub trait QueuePayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Type tag persisted alongside the payload.
    fn job_type(&self) -> &'static str;
}

/// Tag of a [`JobPayload`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    GenerateProfile,
    RunMatching,
    ExpandMatchPool,
    MonthlyRefresh,
    SendEmail,
}

impl JobType {
    pub const ALL: [JobType; 5] = [
        Self::GenerateProfile,
        Self::RunMatching,
        Self::ExpandMatchPool,
        Self::MonthlyRefresh,
        Self::SendEmail,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GenerateProfile => "generate_profile",
            Self::RunMatching => "run_matching",
            Self::ExpandMatchPool => "expand_match_pool",
            Self::MonthlyRefresh => "monthly_refresh",
            Self::SendEmail => "send_email",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synthesize a researcher profile from bibliographic data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateProfileJob {
    pub user_id: Uuid,
    pub orcid: String,
}

/// Evaluate one researcher pair. Carries identifiers only; context is reloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMatchingJob {
    pub researcher_a_id: Uuid,
    pub researcher_b_id: Uuid,
}

impl RunMatchingJob {
    pub fn for_pair(pair: PairKey) -> Self {
        Self {
            researcher_a_id: pair.researcher_a_id(),
            researcher_b_id: pair.researcher_b_id(),
        }
    }

    /// Canonical pair, tolerating payloads written in either order.
    pub fn pair(&self) -> Result<PairKey> {
        PairKey::new(self.researcher_a_id, self.researcher_b_id)
    }

    /// Dedup key for evaluating a pair at specific profile versions.
    ///
    /// A job already running against older versions must not absorb work
    /// queued for newer ones, so the versions are part of the key.
    pub fn dedup_key_at(key: EvaluationKey) -> String {
        format!(
            "run_matching:{}@{}:{}",
            key.pair, key.profile_version_a, key.profile_version_b
        )
    }
}

/// Apply affiliation / all-users pool rules for a newly profiled researcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpandMatchPoolJob {
    pub user_id: Uuid,
}

/// Re-fetch publications and regenerate the profile if anything changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyRefreshJob {
    pub user_id: Uuid,
}

/// Deliver a templated email through the email collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendEmailJob {
    pub user_id: Uuid,
    pub template: String,
    #[serde(default)]
    pub data: JsonValue,
}

/// The closed set of work the pipeline performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum JobPayload {
    GenerateProfile(GenerateProfileJob),
    RunMatching(RunMatchingJob),
    ExpandMatchPool(ExpandMatchPoolJob),
    MonthlyRefresh(MonthlyRefreshJob),
    SendEmail(SendEmailJob),
}

impl JobPayload {
    pub fn kind(&self) -> JobType {
        match self {
            Self::GenerateProfile(_) => JobType::GenerateProfile,
            Self::RunMatching(_) => JobType::RunMatching,
            Self::ExpandMatchPool(_) => JobType::ExpandMatchPool,
            Self::MonthlyRefresh(_) => JobType::MonthlyRefresh,
            Self::SendEmail(_) => JobType::SendEmail,
        }
    }

    /// Key under which at most one live (pending/processing) copy may exist.
    ///
    /// Emails are never collapsed: two sends of the same template are two emails.
    pub fn dedup_key(&self) -> Option<String> {
        match self {
            Self::GenerateProfile(job) => Some(format!("generate_profile:{}", job.user_id)),
            Self::RunMatching(job) => Some(match job.pair() {
                Ok(pair) => format!("run_matching:{}", pair),
                Err(_) => format!(
                    "run_matching:{}:{}",
                    job.researcher_a_id, job.researcher_b_id
                ),
            }),
            Self::ExpandMatchPool(job) => Some(format!("expand_match_pool:{}", job.user_id)),
            Self::MonthlyRefresh(job) => Some(format!("monthly_refresh:{}", job.user_id)),
            Self::SendEmail(_) => None,
        }
    }
}

impl QueuePayload for JobPayload {
    fn job_type(&self) -> &'static str {
        self.kind().as_str()
    }
}

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    /// Retry budget exhausted; never claimed again automatically.
    Dead,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "dead" => Ok(Self::Dead),
            other => Err(Error::Serialization(format!("unknown job status: {}", other))),
        }
    }
}

/// A persisted unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob<P> {
    pub id: Uuid,
    pub job_type: String,
    pub payload: P,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_run_at: DateTime<Utc>,
    pub locked_by: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What `complete` did with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteOutcome {
    Completed,
    /// The caller no longer holds the lease; the row was left untouched.
    LeaseLost,
}

/// What `fail` did with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back to pending, claimable again at `next_run_at`.
    Retrying {
        attempts: i32,
        next_run_at: DateTime<Utc>,
    },
    /// Dead-lettered.
    Dead { attempts: i32 },
    /// The caller no longer holds the lease; the row was left untouched.
    LeaseLost,
}

/// Queue statistics summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub dead: i64,
    pub total: i64,
}
