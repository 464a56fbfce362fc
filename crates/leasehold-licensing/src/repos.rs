//! Bundle of repository handles shared by the services.

use leasehold_core::ports::{
    ActivityLogRepository, LicenseRepository, PatchTokenRepository, ServerRepository,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Repositories {
    pub licenses: Arc<dyn LicenseRepository>,
    pub servers: Arc<dyn ServerRepository>,
    pub patch_tokens: Arc<dyn PatchTokenRepository>,
    pub activity: Arc<dyn ActivityLogRepository>,
}

impl Repositories {
    /// Use one store for every repository.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: LicenseRepository
            + ServerRepository
            + PatchTokenRepository
            + ActivityLogRepository
            + 'static,
    {
        Self {
            licenses: store.clone(),
            servers: store.clone(),
            patch_tokens: store.clone(),
            activity: store,
        }
    }
}
