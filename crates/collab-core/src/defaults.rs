//! Centralized default constants for the matching pipeline.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates and binaries reference these constants instead of defining their
//! own magic numbers.

// =============================================================================
// DATABASE
// =============================================================================

/// Default database URL when `DATABASE_URL` is unset.
pub const DATABASE_URL: &str = "postgres://localhost/collab";

/// Default maximum number of pooled connections.
pub const DB_MAX_CONNECTIONS: u32 = 10;

// =============================================================================
// JOB QUEUE
// =============================================================================

/// Attempts before a job is dead-lettered.
pub const JOB_MAX_ATTEMPTS: i32 = 5;

/// Base delay for exponential job backoff in milliseconds.
pub const JOB_BACKOFF_BASE_MS: i64 = 1_000;

/// Upper bound on job backoff in milliseconds (1 hour).
pub const JOB_BACKOFF_MAX_MS: i64 = 3_600_000;

/// Lock lease on a claimed job in seconds.
///
/// Must exceed [`JOB_TIMEOUT_SECS`] so a live worker never loses its lease
/// mid-execution.
pub const JOB_LOCK_SECS: u64 = 600;

/// Completed jobs older than this are eligible for purging (days).
pub const JOB_RETENTION_DAYS: i64 = 14;

// =============================================================================
// WORKER
// =============================================================================

/// Poll interval when the queue is empty, in milliseconds.
pub const JOB_POLL_INTERVAL_MS: u64 = 5_000;

/// Jobs claimed per poll and processed concurrently.
pub const JOB_BATCH_SIZE: usize = 4;

/// Per-job execution timeout in seconds (5 minutes).
pub const JOB_TIMEOUT_SECS: u64 = 300;

/// Worker event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// INFERENCE
// =============================================================================

/// Default OpenAI-compatible endpoint.
pub const LLM_BASE_URL: &str = "https://api.openai.com/v1";

/// Default generation model.
pub const LLM_MODEL: &str = "gpt-4o-mini";

/// Timeout for generation requests in seconds.
pub const LLM_TIMEOUT_SECS: u64 = 120;

/// Attempts per model call on transient failure.
pub const LLM_MAX_ATTEMPTS: u32 = 3;

/// Base delay between model call retries in milliseconds.
pub const LLM_RETRY_BASE_MS: u64 = 500;

/// Cap on the delay between model call retries in milliseconds.
pub const LLM_RETRY_MAX_MS: u64 = 8_000;

// =============================================================================
// MATCHING
// =============================================================================

/// Publications per researcher included in the model context (most recent first).
pub const CONTEXT_MAX_PUBLICATIONS: usize = 30;

/// Characters of each abstract kept in the model context.
pub const CONTEXT_ABSTRACT_CHARS: usize = 600;

// =============================================================================
// COLLABORATORS
// =============================================================================

/// Base URL for the surrounding application's internal endpoints.
pub const COLLABORATOR_BASE_URL: &str = "http://127.0.0.1:3000/internal";

/// Timeout for collaborator HTTP calls in seconds.
pub const COLLABORATOR_TIMEOUT_SECS: u64 = 600;

/// Lifetime of best-effort progress entries in seconds.
pub const PROGRESS_TTL_SECS: u64 = 3_600;
