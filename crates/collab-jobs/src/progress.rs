//! Best-effort, process-local profile generation progress.
//!
//! Entries exist only for UI polling. They vanish on restart and expire after
//! a TTL; callers fall back to durable state through [`ProfileProgressCache::reconcile`].

use std::time::Duration;

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use collab_core::defaults;

/// Stage reported to a user waiting on their profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "message", rename_all = "snake_case")]
pub enum ProgressStage {
    Queued,
    GeneratingProfile,
    ExpandingMatchPool,
    Complete,
    Error(String),
    /// Nothing cached and no durable profile.
    Unknown,
}

impl ProgressStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error(_))
    }
}

/// Shared TTL cache of progress stages keyed by user.
///
/// Clones share the same underlying cache.
#[derive(Clone)]
pub struct ProfileProgressCache {
    entries: Cache<Uuid, ProgressStage>,
    ttl: Duration,
}

impl std::fmt::Debug for ProfileProgressCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileProgressCache")
            .field("entries", &self.entries.entry_count())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl Default for ProfileProgressCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(defaults::PROGRESS_TTL_SECS))
    }
}

impl ProfileProgressCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Cache::builder().time_to_live(ttl).build(),
            ttl,
        }
    }

    /// TTL from `PROGRESS_TTL_SECS`.
    pub fn from_env() -> Self {
        let secs = std::env::var("PROGRESS_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|s| *s > 0)
            .unwrap_or(defaults::PROGRESS_TTL_SECS);
        Self::new(Duration::from_secs(secs))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record a stage; each write restarts the entry's TTL.
    pub async fn set(&self, user_id: Uuid, stage: ProgressStage) {
        self.entries.insert(user_id, stage).await;
    }

    /// Cached stage, `None` when absent or expired.
    pub async fn get(&self, user_id: Uuid) -> Option<ProgressStage> {
        self.entries.get(&user_id).await
    }

    pub async fn clear(&self, user_id: Uuid) {
        self.entries.invalidate(&user_id).await;
    }

/// Cached stage if present, otherwise what durable state implies.
    pub async fn reconcile(&self, user_id: Uuid, profile_exists: bool) -> ProgressStage {
        match self.get(user_id).await {
            Some(stage) => stage,
            None if profile_exists => ProgressStage::Complete,
            None => ProgressStage::Unknown,
        }
    }
}
