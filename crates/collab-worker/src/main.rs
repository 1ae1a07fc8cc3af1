//! collab-worker: background worker and operator commands for the
//! collaboration matching pipeline.
//!
//! `work` runs the dispatcher until interrupted. The other subcommands are
//! one-shot triggers and queue maintenance, meant for cron and operators.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use collab_core::{defaults, JobQueue};
use collab_db::{Database, PoolConfig, PoolHealth, QueueConfig};
use collab_inference::backend_from_env;
use collab_jobs::{
    HttpCollaborators, PipelineServices, ProfileProgressCache, TriggerReport, Triggers,
    WorkerBuilder, WorkerConfig,
};
use collab_matching::MatchingEngine;

const DEFAULT_LOG_FILTER: &str =
    "collab_worker=info,collab_jobs=info,collab_db=info,collab_matching=info,collab_inference=info";

#[derive(Parser)]
#[command(name = "collab-worker")]
#[command(author, version, about = "Collaboration matching background worker")]
#[command(propagate_version = true)]
struct Cli {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", default_value = defaults::DATABASE_URL, global = true)]
    database_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the job dispatcher until interrupted
    Work {
        /// Process everything currently due, then exit
        #[arg(long)]
        once: bool,

        /// Do not apply pending migrations on startup
        #[arg(long)]
        skip_migrations: bool,
    },

    /// Enqueue every globally eligible pair
    Sweep,

    /// Enqueue a monthly refresh for every researcher with a profile
    Refresh,

    /// Enqueue matching for a pair that just entered a match pool
    EnqueuePair { user_a: Uuid, user_b: Uuid },

    /// Enqueue matching for every eligible pair of a researcher whose
    /// profile changed
    ProfileUpdated { user_id: Uuid },

    /// Enqueue profile generation for a researcher
    GenerateProfile { user_id: Uuid, orcid: String },

    /// Apply pending database migrations
    Migrate,

    /// Print queue counts by status and pool occupancy as JSON
    Stats,

    /// List dead-lettered jobs
    ListDead {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Return a dead-lettered job to the queue with a fresh attempt budget
    Requeue { job_id: Uuid },

    /// Delete completed jobs older than the given age
    Purge {
        #[arg(long, default_value_t = defaults::JOB_RETENTION_DAYS)]
        older_than_days: i64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_logging();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{:#}", e), "collab-worker failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialise tracing.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables daily-rotated file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter
fn init_logging() -> Option<WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let path = Path::new(path);
        let file_dir = path.parent().unwrap_or(Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("collab-worker.log");
        let (writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(file_dir, file_name));

        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                .init();
        } else {
            // No ANSI in files unless asked for.
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let pool_config = PoolConfig::from_env();
    let db = Database::connect_with_config(&cli.database_url, pool_config.clone(), QueueConfig::from_env())
        .await
        .context("connecting to database")?;

    match cli.command {
        Commands::Work {
            once,
            skip_migrations,
        } => {
            if !skip_migrations {
                migrate(&db).await?;
            }
            cmd_work(&db, &pool_config, once).await
        }
        Commands::Migrate => migrate(&db).await,
        Commands::Sweep => {
            let report = triggers(&db).enqueue_scheduled_sweep().await?;
            print_report(&report)
        }
        Commands::Refresh => {
            let report = triggers(&db)
                .enqueue_monthly_refresh_all()
                .await?;
            print_report(&report)
        }
        Commands::EnqueuePair { user_a, user_b } => {
            let report = triggers(&db)
                .enqueue_for_new_pair(user_a, user_b)
                .await?;
            print_report(&report)
        }
        Commands::ProfileUpdated { user_id } => {
            let report = triggers(&db)
                .enqueue_for_profile_update(user_id)
                .await?;
            print_report(&report)
        }
        Commands::GenerateProfile { user_id, orcid } => {
            match triggers(&db)
                .enqueue_profile_generation(user_id, orcid)
                .await?
            {
                Some(job_id) => println!("{}", job_id),
                None => println!("already queued"),
            }
            Ok(())
        }
        Commands::Stats => {
            let stats = db.jobs.stats().await?;
            let report = serde_json::json!({
                "queue": stats,
                "pool": PoolHealth::of(db.pool()),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::ListDead { limit } => {
            for job in db.jobs.list_dead(limit).await? {
                println!(
                    "{}\t{}\tattempts={}\t{}",
                    job.id,
                    job.job_type,
                    job.attempts,
                    job.last_error.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        Commands::Requeue { job_id } => {
            if !db.jobs.requeue(job_id).await? {
                anyhow::bail!("job {} is not dead-lettered", job_id);
            }
            println!("requeued {}", job_id);
            Ok(())
        }
        Commands::Purge { older_than_days } => {
            let removed = db
                .jobs
                .purge_completed(retention(older_than_days)?)
                .await?;
            info!(removed, older_than_days, "Completed jobs purged");
            println!("{}", removed);
            Ok(())
        }
    }
}

async fn migrate(db: &Database) -> anyhow::Result<()> {
    info!("Running database migrations...");
    db.migrate().await.context("running migrations")?;
    info!("Database migrations complete");
    Ok(())
}

/// Trigger API over the database alone; enqueueing needs no model backend.
fn triggers(db: &Database) -> Triggers {
    Triggers::new(
        Arc::new(db.jobs.clone()),
        Arc::new(db.resolver.clone()),
        Arc::new(db.matching_data.clone()),
    )
}

/// Wire storage, model backend and collaborators into the pipeline.
fn services(db: &Database) -> anyhow::Result<PipelineServices> {
    let backend = backend_from_env().context("configuring inference backend")?;
    let engine = MatchingEngine::new(Arc::new(backend));
    info!(model = engine.model_name(), "Inference backend initialized");

    let collaborators =
        HttpCollaborators::from_env().context("configuring collaborator client")?;
    Ok(PipelineServices::from_database(
        db,
        engine,
        collaborators,
        ProfileProgressCache::from_env(),
    ))
}

async fn cmd_work(db: &Database, pool_config: &PoolConfig, once: bool) -> anyhow::Result<()> {
    let worker_config = WorkerConfig::from_env();
    worker_config.validate(db.jobs.config().lock_duration)?;
    if !pool_config.fits_batch(worker_config.batch_size) {
        warn!(
            max_connections = pool_config.max_connections,
            batch_size = worker_config.batch_size,
            "DB_MAX_CONNECTIONS should exceed JOB_BATCH_SIZE; jobs will wait on the pool"
        );
    }
    if !worker_config.enabled {
        warn!("Job worker disabled by JOB_WORKER_ENABLED");
        return Ok(());
    }

    let services = services(db)?;
    let worker = WorkerBuilder::new(services.queue.clone(), services.handler_set())
        .with_config(worker_config)
        .with_notify(db.jobs.job_notify())
        .build();

    if once {
        let processed = worker.drain().await?;
        info!(processed, "Queue drained");
        return Ok(());
    }

    let handle = worker.start();
    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    info!("Shutdown signal received, finishing current batch");

    handle.shutdown().await?;
    handle.stopped().await?;
    Ok(())
}

/// Retention window for `purge`; rejects negative and out-of-range ages.
fn retention(days: i64) -> anyhow::Result<chrono::Duration> {
    if days < 0 {
        anyhow::bail!("--older-than-days must not be negative (got {})", days);
    }
    chrono::Duration::try_days(days)
        .with_context(|| format!("--older-than-days {} is out of range", days))
}

fn print_report(report: &TriggerReport) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retention_accepts_ordinary_ages() {
        assert_eq!(retention(0).unwrap(), chrono::Duration::zero());
        assert_eq!(retention(30).unwrap(), chrono::Duration::days(30));
    }

    #[test]
    fn test_retention_rejects_unrepresentable_ages() {
        assert!(retention(-1).is_err());
        assert!(retention(i64::MAX).is_err());
        assert!(retention(i64::MIN).is_err());
    }
}
