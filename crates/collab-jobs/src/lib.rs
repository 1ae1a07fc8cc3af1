//! # collab-jobs
//!
//! Worker dispatcher for the collaboration matching pipeline.
//!
//! This crate provides:
//! - Exhaustive dispatch of the closed job payload set to handlers
//! - A polling worker with batch concurrency, per-job timeouts, and events
//! - The `run_matching`, profile, pool expansion, and email handlers
//! - The Trigger API through which other subsystems enqueue work
//! - A best-effort profile progress cache
//!
//! ## Example
//!
//! ```rust,ignore
//! use collab_jobs::{PipelineServices, WorkerBuilder, WorkerConfig};
//!
//! let services = PipelineServices::from_database(&db, engine, collaborators, progress);
//! let worker = WorkerBuilder::new(services.queue.clone(), services.handler_set())
//!     .with_config(WorkerConfig::from_env())
//!     .with_notify(db.jobs.job_notify())
//!     .build();
//! let handle = worker.start();
//! ```

pub mod collaborators;
pub mod dispatcher;
pub mod handler;
pub mod handlers;
pub mod progress;
pub mod services;
pub mod triggers;
pub mod worker;

pub use collaborators::{CollaboratorConfig, HttpCollaborators};
pub use dispatcher::{Dispatcher, HandlerSet};
pub use handler::{HandlerOutcome, JobContext, JobHandler};
pub use handlers::{
    ExpandMatchPoolHandler, GenerateProfileHandler, MonthlyRefreshHandler, RunMatchingHandler,
    SendEmailHandler,
};
pub use progress::{ProfileProgressCache, ProgressStage};
pub use services::PipelineServices;
pub use triggers::{TriggerReport, Triggers};
pub use worker::{default_worker_id, JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};
