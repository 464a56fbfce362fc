//! Application state shared across handlers.

use leasehold_cache::EphemeralExchange;
use leasehold_db::Database;
use leasehold_licensing::{LicenseService, PatchService, ServerService};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub licenses: Arc<LicenseService>,
    pub servers: Arc<ServerService>,
    pub patches: Arc<PatchService>,
    pub exchange: Arc<EphemeralExchange>,
    /// Bearer token required on admin routes.
    pub admin_token: Arc<str>,
    /// Base URL targets use to reach this server.
    pub public_url: Arc<str>,
    /// Checked by the readiness probe. `None` when running on the in-memory store.
    pub database: Option<Database>,
}

impl AppState {
    pub fn new(
        licenses: Arc<LicenseService>,
        servers: Arc<ServerService>,
        patches: Arc<PatchService>,
        exchange: Arc<EphemeralExchange>,
        admin_token: impl Into<Arc<str>>,
        public_url: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            licenses,
            servers,
            patches,
            exchange,
            admin_token: admin_token.into(),
            public_url: public_url.into(),
            database: None,
        }
    }

    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }
}
