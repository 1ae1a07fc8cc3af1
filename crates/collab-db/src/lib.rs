//! # collab-db
//!
//! PostgreSQL database layer for the collaboration matching pipeline.
//!
//! This crate provides:
//! - Connection pool management
//! - The durable job queue (`FOR UPDATE SKIP LOCKED` claiming, leases, backoff)
//! - The eligible pair resolver
//! - Pair context reads and the transactional proposal store
//!
//! ## Example
//!
//! ```rust,ignore
//! use collab_db::{Database, JobQueue, JobPayload, RunMatchingJob, PairKey};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/collab").await?;
//!     db.migrate().await?;
//!
//!     let pair = PairKey::new(user_a, user_b)?;
//!     db.jobs.enqueue(JobPayload::RunMatching(RunMatchingJob::for_pair(pair))).await?;
//!     Ok(())
//! }
//! ```

pub mod eligibility;
pub mod jobs;
pub mod matching_data;
pub mod pool;
pub mod proposals;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use collab_core::*;

pub use eligibility::PgEligibilityResolver;
pub use jobs::{backoff_delay_ms, PgJobQueue, QueueConfig};
pub use matching_data::PgMatchingData;
pub use pool::{create_pool, create_pool_with_config, PoolConfig, PoolHealth};
pub use proposals::PgProposalStore;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Durable job queue over the pipeline's payload set.
    pub jobs: PgJobQueue<JobPayload>,
    /// Eligible pair resolver.
    pub resolver: PgEligibilityResolver,
    /// Profile, publication and pool reads for context assembly.
    pub matching_data: PgMatchingData,
    /// Proposal and matching result persistence.
    pub proposals: PgProposalStore,
}

impl Database {
    /// Create a new Database instance from an existing pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self::with_queue_config(pool, QueueConfig::default())
    }

    /// Create with custom job queue retry settings.
    pub fn with_queue_config(pool: sqlx::Pool<sqlx::Postgres>, queue: QueueConfig) -> Self {
        Self {
            jobs: PgJobQueue::with_config(pool.clone(), queue),
            resolver: PgEligibilityResolver::new(pool.clone()),
            matching_data: PgMatchingData::new(pool.clone()),
            proposals: PgProposalStore::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool and queue configuration.
    pub async fn connect_with_config(
        url: &str,
        config: PoolConfig,
        queue: QueueConfig,
    ) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::with_queue_config(pool, queue))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
