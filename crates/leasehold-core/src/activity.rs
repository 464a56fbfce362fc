//! Append-only audit trail.

use crate::ids::{ActivityLogId, LicenseRecordId, ServerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLog {
    pub id: ActivityLogId,
    pub license_id: Option<LicenseRecordId>,
    pub server_id: Option<ServerId>,
    pub action: AuditAction,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    CreateServer,
    UpdateServer,
    DeleteServer,
    TestConnection,
    CreateLicense,
    EditLicense,
    ActivateLicense,
    DeactivateLicense,
    SuspendLicense,
    ExpireLicense,
    ExtendLicense,
    TransferLicense,
    DeployLicense,
    DeployFailed,
    UndeployLicense,
    DeleteLicense,
    ProvisionLicense,
    ProvisionHwidMismatch,
    VerifySuccess,
    VerifyHwidMismatch,
    VerifyExpired,
    VerifySuspended,
    AutoSuspend,
    CreatePatch,
    ActivatePatch,
    RevokePatch,
    LicenseFromPatch,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::CreateServer => "create_server",
            AuditAction::UpdateServer => "update_server",
            AuditAction::DeleteServer => "delete_server",
            AuditAction::TestConnection => "test_connection",
            AuditAction::CreateLicense => "create_license",
            AuditAction::EditLicense => "edit_license",
            AuditAction::ActivateLicense => "activate_license",
            AuditAction::DeactivateLicense => "deactivate_license",
            AuditAction::SuspendLicense => "suspend_license",
            AuditAction::ExpireLicense => "expire_license",
            AuditAction::ExtendLicense => "extend_license",
            AuditAction::TransferLicense => "transfer_license",
            AuditAction::DeployLicense => "deploy_license",
            AuditAction::DeployFailed => "deploy_failed",
            AuditAction::UndeployLicense => "undeploy_license",
            AuditAction::DeleteLicense => "delete_license",
            AuditAction::ProvisionLicense => "provision_license",
            AuditAction::ProvisionHwidMismatch => "provision_hwid_mismatch",
            AuditAction::VerifySuccess => "verify_success",
            AuditAction::VerifyHwidMismatch => "verify_hwid_mismatch",
            AuditAction::VerifyExpired => "verify_expired",
            AuditAction::VerifySuspended => "verify_suspended",
            AuditAction::AutoSuspend => "auto_suspend",
            AuditAction::CreatePatch => "create_patch",
            AuditAction::ActivatePatch => "activate_patch",
            AuditAction::RevokePatch => "revoke_patch",
            AuditAction::LicenseFromPatch => "license_from_patch",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
    }

    /// Hardware mismatches are security events.
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            AuditAction::ProvisionHwidMismatch | AuditAction::VerifyHwidMismatch
        )
    }
}

/// An audit entry before it is persisted.
#[derive(Debug, Clone)]
pub struct NewActivityLog {
    pub license_id: Option<LicenseRecordId>,
    pub server_id: Option<ServerId>,
    pub action: AuditAction,
    pub details: String,
}

impl NewActivityLog {
    pub fn new(action: AuditAction, details: impl Into<String>) -> Self {
        Self {
            license_id: None,
            server_id: None,
            action,
            details: details.into(),
        }
    }

    pub fn license(mut self, id: LicenseRecordId) -> Self {
        self.license_id = Some(id);
        self
    }

    pub fn server(mut self, id: Option<ServerId>) -> Self {
        self.server_id = id;
        self
    }

    /// Stamp the entry, producing the record to persist.
    pub fn at(self, created_at: DateTime<Utc>) -> ActivityLog {
        ActivityLog {
            id: ActivityLogId::new(),
            license_id: self.license_id,
            server_id: self.server_id,
            action: self.action,
            details: self.details,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names_match_serde() {
        for action in [
            AuditAction::AutoSuspend,
            AuditAction::ProvisionHwidMismatch,
            AuditAction::LicenseFromPatch,
        ] {
            let json = serde_json::to_value(action).unwrap();
            assert_eq!(json.as_str(), Some(action.as_str()));
            assert_eq!(AuditAction::parse(action.as_str()), Some(action));
        }
    }
}
