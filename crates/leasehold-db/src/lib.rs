//! Persistence for Leasehold: PostgreSQL repositories and an in-memory store.

pub mod memory;
pub mod repositories;

pub use memory::MemoryStore;
pub use repositories::*;

use leasehold_core::{Error, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to the database.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        info!("Applying database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    /// Cheap round trip used by the readiness probe.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    pub fn licenses(&self) -> PgLicenseRepository {
        PgLicenseRepository::new(self.pool.clone())
    }

    pub fn servers(&self) -> PgServerRepository {
        PgServerRepository::new(self.pool.clone())
    }

    pub fn patch_tokens(&self) -> PgPatchTokenRepository {
        PgPatchTokenRepository::new(self.pool.clone())
    }

    pub fn activity_logs(&self) -> PgActivityLogRepository {
        PgActivityLogRepository::new(self.pool.clone())
    }
}

/// Map a sqlx error, turning unique violations into `Conflict`.
pub(crate) fn map_db_error(err: sqlx::Error, conflict: impl FnOnce(&str) -> String) -> Error {
    if let sqlx::Error::Database(db) = &err
        && db.is_unique_violation()
    {
        return Error::Conflict(conflict(db.constraint().unwrap_or_default()));
    }
    Error::Database(err.to_string())
}
