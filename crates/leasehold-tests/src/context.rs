//! PostgreSQL-backed test context.

use crate::containers::PostgresContainer;
use leasehold_db::Database;
use leasehold_licensing::Repositories;
use std::sync::Arc;

/// A migrated database in a fresh container. Drop it to stop the container.
pub struct TestContext {
    pub postgres: PostgresContainer,
    pub db: Database,
}

impl TestContext {
    pub async fn new() -> anyhow::Result<Self> {
        crate::init_test_logging();

        let postgres = PostgresContainer::start().await?;
        let db = Database::connect(postgres.connection_string()).await?;
        db.migrate().await?;

        Ok(Self { postgres, db })
    }

    /// PostgreSQL repositories bundled for the services.
    pub fn repositories(&self) -> Repositories {
        Repositories {
            licenses: Arc::new(self.db.licenses()),
            servers: Arc::new(self.db.servers()),
            patch_tokens: Arc::new(self.db.patch_tokens()),
            activity: Arc::new(self.db.activity_logs()),
        }
    }

    pub fn db_url(&self) -> &str {
        self.postgres.connection_string()
    }
}
