//! # glimmer-db
//!
//! PostgreSQL database layer for glimmer.
//!
//! This crate provides:
//! - Connection pool management
//! - `ai_cache` backed [`CacheStore`](glimmer_core::CacheStore)
//! - `job_queue` backed [`JobStore`](glimmer_core::JobStore) with `SKIP LOCKED` claims
//! - Read-only, time-boxed execution of validated search statements
//! - Filesystem object storage for uploaded photos
//! - In-memory stores for tests and local runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use glimmer_db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/glimmer").await?;
//!     let counts = glimmer_core::JobStore::counts(&db.jobs).await?;
//!     println!("waiting jobs: {}", counts.waiting);
//!     Ok(())
//! }
//! ```
pub mod analyses;
pub mod cache_store;
pub mod executor;
pub mod jobs;
pub mod memory;
pub mod object_store;
pub mod pool;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use glimmer_core::*;

pub use analyses::PgAnalysisSink;
pub use cache_store::PgCacheStore;
pub use executor::PgQueryExecutor;
pub use jobs::PgJobStore;
pub use object_store::FilesystemObjectStore;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};

/// Combined database context with all stores.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// AI result cache rows.
    pub cache: PgCacheStore,
    /// Durable job queue.
    pub jobs: PgJobStore,
    /// Photo analysis results.
    pub analyses: PgAnalysisSink,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            cache: PgCacheStore::new(pool.clone()),
            jobs: PgJobStore::new(pool.clone()),
            analyses: PgAnalysisSink::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
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

    /// Executor for validated search statements.
    pub fn query_executor(&self) -> PgQueryExecutor {
        PgQueryExecutor::new(self.pool.clone())
    }
}
