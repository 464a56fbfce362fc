//! One-time patch tokens used for two-phase onboarding of unknown targets.

use crate::ids::{LicenseRecordId, PatchTokenId, ServerId};
use crate::validation::{FieldError, Validate, require_at_least, require_max_len, require_non_empty};
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchToken {
    pub id: PatchTokenId,
    pub token: String,
    pub person_name: String,
    pub max_users: i32,
    pub max_sites: i32,
    pub duration_days: i32,
    pub status: PatchStatus,
    /// Set once an admin attaches a license.
    pub license_id: Option<LicenseRecordId>,
    pub server_id: Option<ServerId>,
    pub notes: Option<String>,
    pub target_ip: Option<String>,
    pub activated_hostname: Option<String>,
    pub activated_ip: Option<String>,
    pub hardware_id: Option<String>,
    pub hwid_salt: Option<String>,
    pub raw_hwid_fingerprint: Option<String>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PatchToken {
    /// Activated but still waiting for an admin to issue a license.
    pub fn is_awaiting_license(&self) -> bool {
        self.status == PatchStatus::Used && self.license_id.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    Pending,
    Used,
    Revoked,
}

impl PatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchStatus::Pending => "pending",
            PatchStatus::Used => "used",
            PatchStatus::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PatchStatus::Pending),
            "used" => Some(PatchStatus::Used),
            "revoked" => Some(PatchStatus::Revoked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPatchToken {
    pub person_name: String,
    #[serde(default = "default_max_users")]
    pub max_users: i32,
    #[serde(default = "default_max_sites")]
    pub max_sites: i32,
    #[serde(default = "default_duration_days")]
    pub duration_days: i32,
    pub server_id: Option<ServerId>,
    pub notes: Option<String>,
    pub target_ip: Option<String>,
}

fn default_max_users() -> i32 {
    crate::license::DEFAULT_MAX_USERS
}

fn default_max_sites() -> i32 {
    crate::license::DEFAULT_MAX_SITES
}

fn default_duration_days() -> i32 {
    30
}

impl Validate for NewPatchToken {
    fn validate(&self) -> Result<(), FieldError> {
        require_non_empty("person_name", &self.person_name)?;
        require_max_len("person_name", &self.person_name, 256)?;
        require_at_least("max_users", self.max_users.into(), 1)?;
        require_at_least("max_sites", self.max_sites.into(), 1)?;
        require_at_least("duration_days", self.duration_days.into(), 1)?;
        Ok(())
    }
}

/// Generate a fresh URL-safe token from 24 random bytes.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_url_safe_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [PatchStatus::Pending, PatchStatus::Used, PatchStatus::Revoked] {
            assert_eq!(PatchStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PatchStatus::parse("expired"), None);
    }
}
