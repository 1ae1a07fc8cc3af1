//! Structured logging field name constants.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Dead-lettered job, unreachable dependency, operator attention |
//! | WARN  | Retried failure, discarded model output |
//! | INFO  | Lifecycle events, job completions, trigger summaries |
//! | DEBUG | Decision points (eligibility skips, dedup, backoff choice) |
//! | TRACE | Per-item iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "inference", "matching", "jobs", "worker"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "job_queue", "resolver", "engine", "dispatcher"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "claim_next", "fail", "store", "generate"
pub const OPERATION: &str = "op";

/// Lock owner identity of a worker process.
pub const WORKER_ID: &str = "worker_id";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Job type tag.
pub const JOB_TYPE: &str = "job_type";

/// Lower researcher id of a canonical pair.
pub const RESEARCHER_A_ID: &str = "researcher_a_id";

/// Higher researcher id of a canonical pair.
pub const RESEARCHER_B_ID: &str = "researcher_b_id";

/// A single researcher being operated on.
pub const USER_ID: &str = "user_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Attempt number (1-based).
pub const ATTEMPT: &str = "attempt";

/// Number of rows/items produced.
pub const RESULT_COUNT: &str = "result_count";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for inference.
pub const MODEL: &str = "model";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
