//! Port traits.
//!
//! Interfaces between the licensing domain and its adapters: persistence and
//! the remote deployment channel.

use crate::activity::ActivityLog;
use crate::ids::*;
use crate::license::{License, LicenseStatus};
use crate::patch::{PatchStatus, PatchToken};
use crate::server::Server;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Repository for licenses.
///
/// Implementations enforce both uniqueness rules atomically: `license_id` is
/// unique, and at most one license references a given server. Either violation
/// is reported as `Error::Conflict`.
#[async_trait]
pub trait LicenseRepository: Send + Sync {
    /// Insert a new license.
    async fn insert(&self, license: &License) -> Result<()>;

    /// Get a license by row id.
    async fn get(&self, id: LicenseRecordId) -> Result<Option<License>>;

    /// Get a license by its admin-chosen name.
    async fn get_by_license_id(&self, license_id: &str) -> Result<Option<License>>;

    /// Get the license bound to a server, if any.
    async fn get_by_server(&self, server_id: ServerId) -> Result<Option<License>>;

    /// List all licenses, newest first.
    async fn list(&self) -> Result<Vec<License>>;

    /// List licenses in one status.
    async fn list_by_status(&self, status: LicenseStatus) -> Result<Vec<License>>;

    /// Overwrite a license.
    async fn update(&self, license: &License) -> Result<()>;

    /// Overwrite a license only while its stored row has no hardware binding.
    ///
    /// Returns `false`, writing nothing, when another caller bound it first.
    async fn bind_hardware(&self, license: &License) -> Result<bool>;

    /// Suspend `id` if it is still active and was last verified before `cutoff`.
    /// Returns whether the row changed.
    async fn suspend_if_silent(
        &self,
        id: LicenseRecordId,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Repository for deployment targets.
#[async_trait]
pub trait ServerRepository: Send + Sync {
    async fn insert(&self, server: &Server) -> Result<()>;

    async fn get(&self, id: ServerId) -> Result<Option<Server>>;

    async fn list(&self) -> Result<Vec<Server>>;

    async fn update(&self, server: &Server) -> Result<()>;

    async fn delete(&self, id: ServerId) -> Result<()>;
}

/// Repository for patch tokens.
#[async_trait]
pub trait PatchTokenRepository: Send + Sync {
    async fn insert(&self, token: &PatchToken) -> Result<()>;

    async fn get(&self, id: PatchTokenId) -> Result<Option<PatchToken>>;

    async fn get_by_token(&self, token: &str) -> Result<Option<PatchToken>>;

    /// List all tokens, newest first.
    async fn list(&self) -> Result<Vec<PatchToken>>;

    async fn update(&self, token: &PatchToken) -> Result<()>;

    /// Overwrite a token only while its stored status is still `expected`.
    /// `Error::Conflict` when it moved.
    async fn update_if_status(&self, token: &PatchToken, expected: PatchStatus) -> Result<()>;

    /// Insert `license` and link it to the token as one unit.
    ///
    /// Nothing is written, and `Error::Conflict` is returned, unless the token
    /// is used and not yet linked to a license.
    async fn issue_license(&self, token_id: PatchTokenId, license: &License) -> Result<()>;
}

/// Append-only audit trail.
#[async_trait]
pub trait ActivityLogRepository: Send + Sync {
    async fn append(&self, entry: &ActivityLog) -> Result<()>;

    /// Most recent entries, newest first.
    async fn recent(&self, limit: u32) -> Result<Vec<ActivityLog>>;

    /// Most recent entries for one license, newest first.
    async fn for_license(&self, license_id: LicenseRecordId, limit: u32)
    -> Result<Vec<ActivityLog>>;
}

/// Outcome of a connectivity probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub connected: bool,
    /// Raw, unsalted fingerprint.
    pub hardware_id: Option<String>,
    pub error: Option<String>,
}

/// Outcome of a deploy or undeploy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployReport {
    pub success: bool,
    pub error: Option<String>,
    /// Salted hardware id observed on the target during deploy.
    pub hardware_id: Option<String>,
}

impl DeployReport {
    pub fn ok(hardware_id: Option<String>) -> Self {
        Self {
            success: true,
            error: None,
            hardware_id,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            hardware_id: None,
        }
    }
}

/// Installs and removes the license agent on a target.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Check connectivity and read the raw fingerprint.
    async fn probe(&self, server: &Server) -> ProbeResult;

    /// Install or refresh the agent for `license` on `server`.
    ///
    /// Returns `Error::SecurityMismatch` when the license is bound and the
    /// target's fingerprint differs. Remote failures come back as an
    /// unsuccessful report.
    async fn deploy(&self, server: &Server, license: &License) -> Result<DeployReport>;

    /// Remove every agent artifact from `server`.
    async fn undeploy(&self, server: &Server) -> Result<DeployReport>;
}
