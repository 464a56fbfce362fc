//! License lifecycle, patch-token onboarding and heartbeat enforcement.

pub mod audit;
pub mod heartbeat;
pub mod patch;
pub mod repos;
pub mod servers;
pub mod service;

#[cfg(test)]
mod testing;

pub use audit::AuditTrail;
pub use heartbeat::{HeartbeatConfig, HeartbeatMonitor};
pub use patch::PatchService;
pub use repos::Repositories;
pub use servers::ServerService;
pub use service::{LicenseService, ProvisionResult, ProvisionScripts, Stats, VerifyOutcome};
