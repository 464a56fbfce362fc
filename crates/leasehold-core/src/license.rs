//! License records and their status machine.

use crate::ids::{LicenseRecordId, ServerId};
use crate::validation::{
    FieldError, Validate, require_at_least, require_identifier, require_max_len,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_MAX_USERS: i32 = 100;
pub const DEFAULT_MAX_SITES: i32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct License {
    pub id: LicenseRecordId,
    /// Admin-chosen, unique name such as `LIC-9005`.
    pub license_id: String,
    pub server_id: Option<ServerId>,
    /// Salted 64-hex fingerprint, set on first bind.
    pub hardware_id: Option<String>,
    pub hwid_salt: String,
    pub status: LicenseStatus,
    pub expires_at: DateTime<Utc>,
    pub max_users: i32,
    pub max_sites: i32,
    pub client_id: Option<String>,
    pub notes: Option<String>,
    /// Last encrypted payload handed out.
    pub signature: Option<String>,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl License {
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    Inactive,
    Active,
    Suspended,
    Expired,
}

/// What is asking for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A target provisioned the license.
    Provision,
    /// `expires_at` was found to be in the past.
    ExpiryCheck,
    /// The heartbeat sweep found the license silent.
    Heartbeat,
    /// An administrator override.
    Manual,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseStatus::Inactive => "inactive",
            LicenseStatus::Active => "active",
            LicenseStatus::Suspended => "suspended",
            LicenseStatus::Expired => "expired",
        }
    }

    /// Whether `trigger` may move a license from `self` to `next`.
    pub fn can_transition(&self, next: LicenseStatus, trigger: Trigger) -> bool {
        use LicenseStatus::*;
        if *self == next {
            return true;
        }
        match trigger {
            Trigger::Manual => true,
            Trigger::Provision => matches!((self, next), (Inactive, Active)),
            Trigger::Heartbeat => matches!((self, next), (Active, Suspended)),
            Trigger::ExpiryCheck => next == Expired,
        }
    }
}

impl fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LicenseStatus {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(LicenseStatus::Inactive),
            "active" => Ok(LicenseStatus::Active),
            "suspended" => Ok(LicenseStatus::Suspended),
            "expired" => Ok(LicenseStatus::Expired),
            other => Err(FieldError::new("status", format!("unknown status '{other}'"))),
        }
    }
}

/// Input for creating a license by hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLicense {
    pub license_id: String,
    pub server_id: Option<ServerId>,
    pub expires_at: DateTime<Utc>,
    #[serde(default = "default_max_users")]
    pub max_users: i32,
    #[serde(default = "default_max_sites")]
    pub max_sites: i32,
    pub client_id: Option<String>,
    pub notes: Option<String>,
}

fn default_max_users() -> i32 {
    DEFAULT_MAX_USERS
}

fn default_max_sites() -> i32 {
    DEFAULT_MAX_SITES
}

impl Validate for NewLicense {
    fn validate(&self) -> Result<(), FieldError> {
        require_identifier("license_id", &self.license_id)?;
        require_at_least("max_users", self.max_users.into(), 1)?;
        require_at_least("max_sites", self.max_sites.into(), 1)?;
        if let Some(client_id) = &self.client_id {
            require_max_len("client_id", client_id, 128)?;
        }
        if let Some(notes) = &self.notes {
            require_max_len("notes", notes, 4096)?;
        }
        Ok(())
    }
}

/// Entitlement used when an admin turns an activated patch token into a license.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntitlement {
    pub license_id: String,
    pub max_users: Option<i32>,
    pub max_sites: Option<i32>,
    /// Overrides `now + duration_days` from the token.
    pub expires_at: Option<DateTime<Utc>>,
    pub client_id: Option<String>,
    pub notes: Option<String>,
}

impl Validate for TokenEntitlement {
    fn validate(&self) -> Result<(), FieldError> {
        require_identifier("license_id", &self.license_id)?;
        if let Some(max_users) = self.max_users {
            require_at_least("max_users", max_users.into(), 1)?;
        }
        if let Some(max_sites) = self.max_sites {
            require_at_least("max_sites", max_sites.into(), 1)?;
        }
        Ok(())
    }
}

/// Entitlement and metadata edits. Status and binding are not editable here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LicenseEdit {
    pub max_users: Option<i32>,
    pub max_sites: Option<i32>,
    pub notes: Option<String>,
    pub client_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl LicenseEdit {
    pub fn is_empty(&self) -> bool {
        self.max_users.is_none()
            && self.max_sites.is_none()
            && self.notes.is_none()
            && self.client_id.is_none()
            && self.expires_at.is_none()
    }

    /// Names of the fields this edit touches, for the audit trail.
    pub fn touched_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.max_users.is_some() {
            fields.push("max_users");
        }
        if self.max_sites.is_some() {
            fields.push("max_sites");
        }
        if self.notes.is_some() {
            fields.push("notes");
        }
        if self.client_id.is_some() {
            fields.push("client_id");
        }
        if self.expires_at.is_some() {
            fields.push("expires_at");
        }
        fields
    }

    pub fn apply(&self, license: &mut License) {
        if let Some(max_users) = self.max_users {
            license.max_users = max_users;
        }
        if let Some(max_sites) = self.max_sites {
            license.max_sites = max_sites;
        }
        if let Some(notes) = &self.notes {
            license.notes = Some(notes.clone());
        }
        if let Some(client_id) = &self.client_id {
            license.client_id = Some(client_id.clone());
        }
        if let Some(expires_at) = self.expires_at {
            license.expires_at = expires_at;
        }
    }
}

impl Validate for LicenseEdit {
    fn validate(&self) -> Result<(), FieldError> {
        if self.is_empty() {
            return Err(FieldError::new("body", "no editable fields supplied"));
        }
        if let Some(max_users) = self.max_users {
            require_at_least("max_users", max_users.into(), 1)?;
        }
        if let Some(max_sites) = self.max_sites {
            require_at_least("max_sites", max_sites.into(), 1)?;
        }
        if let Some(notes) = &self.notes {
            require_max_len("notes", notes, 4096)?;
        }
        Ok(())
    }
}
