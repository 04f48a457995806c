//! # clearview-db
//!
//! Storage layer for clearview.
//!
//! This crate provides:
//! - Connection pool sizing and monitoring
//! - The PostgreSQL call event store (idempotent upsert by conversation id)
//! - Patient lookup
//! - An in-memory store with the same semantics, for tests and local runs
//! - Blob storage for rehosted media
//!
//! ## Example
//!
//! ```rust,ignore
//! use clearview_db::{CallEventRepository, Database, PoolConfig};
//!
//! let db = Database::connect("postgres://localhost/clearview", &PoolConfig::from_env()).await?;
//! let call = db.calls.get_by_conversation("conv_123").await?;
//! ```

pub mod blob_storage;
pub mod calls;
pub mod memory;
pub mod patients;
pub mod pool;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use clearview_core::*;

pub use blob_storage::{
    compute_content_hash, content_type_for_key, video_key, BlobStore, BlobStoreConfig,
    FilesystemBlobStore, MemoryBlobStore, StoredBlob, MEDIA_ROUTE_PREFIX,
};
pub use calls::PgCallEventRepository;
pub use memory::MemoryStore;
pub use patients::PgPatientRepository;
pub use pool::{log_pool_metrics, PoolConfig, PoolStats};

/// PostgreSQL-backed repositories sharing one pool.
pub struct Database {
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub calls: PgCallEventRepository,
    pub patients: PgPatientRepository,
}

impl Database {
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            calls: PgCallEventRepository::new(pool.clone()),
            patients: PgPatientRepository::new(pool.clone()),
            pool,
        }
    }

    /// Open a pool at `url` and build the repositories over it.
    pub async fn connect(url: &str, config: &PoolConfig) -> Result<Self> {
        let pool = pool::connect(url, config).await?;
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
}
