//! License payloads and the wire codec used between the server and the agent.
//!
//! # Security note
//!
//! [`RotatingXorCodec`] is **obfuscation, not encryption**. The key is a public
//! prefix plus the current hour, and the decoder simply tries all 24 keys so
//! that the two parties do not need synchronized clocks. Anyone holding a blob
//! can read it. Integrity comes from the server-side hardware binding, not
//! from this codec. Callers depend only on the [`PayloadCodec`] trait, so an
//! authenticated scheme can replace it without touching them.

use crate::clock::Clock;
use crate::license::{License, LicenseStatus};
use crate::{Error, Result};
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub const DEFAULT_KEY_PREFIX: &str = "leasehold-k";

/// Feature catalogue granted to every licensed installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Core,
    MultiSite,
    Reporting,
    DataExport,
    ApiAccess,
    AuditTrail,
    BulkOperations,
}

impl Feature {
    pub const ALL: [Feature; 7] = [
        Feature::Core,
        Feature::MultiSite,
        Feature::Reporting,
        Feature::DataExport,
        Feature::ApiAccess,
        Feature::AuditTrail,
        Feature::BulkOperations,
    ];
}

/// The record a deployed agent serves to the licensed software.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LicensePayload {
    pub license_id: String,
    pub hardware_id: String,
    /// UTC, second precision: `YYYY-MM-DD HH:MM:SS`.
    pub expiry: String,
    pub features: Vec<Feature>,
    /// `"1"` when active, `"0"` otherwise (the software runs read-only).
    pub status_flag: String,
    pub max_users: i32,
    pub max_sites: i32,
    pub integrity_hash: String,
}

impl LicensePayload {
    pub fn is_active(&self) -> bool {
        self.status_flag == "1"
    }
}

/// `hex(sha256(license_id:hardware_id:expires_at))`, with the expiry in ISO 8601 millisecond form.
pub fn integrity_hash(license_id: &str, hardware_id: &str, expires_at: DateTime<Utc>) -> String {
    let expiry_iso = expires_at.to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut hasher = Sha256::new();
    hasher.update(format!("{license_id}:{hardware_id}:{expiry_iso}"));
    hex::encode(hasher.finalize())
}

/// Build the payload for `license` as bound to `hardware_id`.
pub fn build_payload(license: &License, hardware_id: &str) -> LicensePayload {
    LicensePayload {
        license_id: license.license_id.clone(),
        hardware_id: hardware_id.to_string(),
        expiry: license.expires_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        features: Feature::ALL.to_vec(),
        status_flag: if license.status == LicenseStatus::Active {
            "1".to_string()
        } else {
            "0".to_string()
        },
        max_users: license.max_users,
        max_sites: license.max_sites,
        integrity_hash: integrity_hash(&license.license_id, hardware_id, license.expires_at),
    }
}

/// Turns payloads into opaque blobs and back.
pub trait PayloadCodec: Send + Sync {
    fn encode(&self, payload: &LicensePayload) -> Result<String>;

    fn decode(&self, blob: &str) -> Result<LicensePayload>;
}

/// Hour-rotating XOR keystream, base64 on the wire.
pub struct RotatingXorCodec {
    prefix: String,
    clock: Arc<dyn Clock>,
}

impl RotatingXorCodec {
    pub fn new(prefix: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            prefix: prefix.into(),
            clock,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `K(h) = prefix + (h + 1)` for hour `h` in `0..24`.
    pub fn key_for_hour(&self, hour: u32) -> String {
        format!("{}{}", self.prefix, hour % 24 + 1)
    }

    pub fn encode_at_hour(&self, payload: &LicensePayload, hour: u32) -> Result<String> {
        let json = serde_json::to_vec(payload)?;
        let key = self.key_for_hour(hour);
        Ok(base64::engine::general_purpose::STANDARD.encode(xor(&json, key.as_bytes())))
    }
}

impl PayloadCodec for RotatingXorCodec {
    fn encode(&self, payload: &LicensePayload) -> Result<String> {
        self.encode_at_hour(payload, self.clock.local_hour())
    }

    fn decode(&self, blob: &str) -> Result<LicensePayload> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(blob.trim())
            .map_err(|_| Error::invalid("encrypted_blob", "not valid base64"))?;

        (0..24)
            .filter_map(|hour| {
                let plain = xor(&bytes, self.key_for_hour(hour).as_bytes());
                serde_json::from_slice::<LicensePayload>(&plain).ok()
            })
            .find(|payload| !payload.hardware_id.is_empty())
            .ok_or_else(|| Error::invalid("encrypted_blob", "no hour key yields a payload"))
    }
}

fn xor(data: &[u8], key: &[u8]) -> Vec<u8> {
    data.iter()
        .zip(key.iter().cycle())
        .map(|(d, k)| d ^ k)
        .collect()
}
