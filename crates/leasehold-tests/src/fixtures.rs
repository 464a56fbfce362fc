//! Test fixtures: request bodies for the API and domain records for the repositories.

use chrono::{DateTime, Duration, Utc};
use leasehold_core::fingerprint::{digest_raw, generate_salt};
use leasehold_core::ids::{LicenseRecordId, PatchTokenId, ServerId};
use leasehold_core::license::{License, LicenseStatus};
use leasehold_core::patch::{PatchStatus, PatchToken, generate_token};
use leasehold_core::server::Server;
use serde_json::{Value, json};

/// A 64-hex hardware id for a named machine.
pub fn hwid(machine: &str) -> String {
    digest_raw(machine, "fixture-salt")
}

/// Request body for `POST /api/licenses`.
pub fn license_request(license_id: &str, expires_at: DateTime<Utc>) -> Value {
    json!({
        "license_id": license_id,
        "expires_at": expires_at.to_rfc3339(),
        "max_users": 25,
        "max_sites": 2,
        "client_id": "acme",
    })
}

/// Request body for `POST /api/servers`.
pub fn server_request(name: &str) -> Value {
    json!({
        "name": name,
        "host": format!("{name}.internal"),
        "port": 22,
        "username": "root",
        "password": "hunter2",
    })
}

/// Request body for `POST /api/patches`.
pub fn patch_request(person_name: &str) -> Value {
    json!({
        "person_name": person_name,
        "max_users": 5,
        "duration_days": 14,
        "notes": "trial",
    })
}

/// Request body for `/api/provision` and `/api/verify`.
pub fn claim(license_id: &str, hardware_id: &str) -> Value {
    json!({ "license_id": license_id, "hardware_id": hardware_id })
}

/// Builder for license records inserted straight into a repository.
pub struct LicenseFixture {
    license: License,
}

impl LicenseFixture {
    pub fn new(license_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            license: License {
                id: LicenseRecordId::new(),
                license_id: license_id.to_string(),
                server_id: None,
                hardware_id: None,
                hwid_salt: generate_salt(),
                status: LicenseStatus::Inactive,
                expires_at: now + Duration::days(30),
                max_users: 10,
                max_sites: 1,
                client_id: None,
                notes: None,
                signature: None,
                last_verified_at: None,
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn server(mut self, server_id: ServerId) -> Self {
        self.license.server_id = Some(server_id);
        self
    }

    /// Bind to a machine and mark active.
    pub fn bound(mut self, machine: &str, verified_at: DateTime<Utc>) -> Self {
        self.license.hardware_id = Some(hwid(machine));
        self.license.status = LicenseStatus::Active;
        self.license.last_verified_at = Some(verified_at);
        self
    }

    pub fn status(mut self, status: LicenseStatus) -> Self {
        self.license.status = status;
        self
    }

    pub fn build(self) -> License {
        self.license
    }
}

pub fn server_fixture(name: &str, now: DateTime<Utc>) -> Server {
    Server {
        id: ServerId::new(),
        name: name.to_string(),
        host: format!("{name}.internal"),
        port: 22,
        username: "root".to_string(),
        password: "hunter2".to_string(),
        is_connected: false,
        last_checked: None,
        hardware_id: None,
        created_at: now,
    }
}

pub fn patch_fixture(person_name: &str, now: DateTime<Utc>) -> PatchToken {
    PatchToken {
        id: PatchTokenId::new(),
        token: generate_token(),
        person_name: person_name.to_string(),
        max_users: 5,
        max_sites: 1,
        duration_days: 30,
        status: PatchStatus::Pending,
        license_id: None,
        server_id: None,
        notes: None,
        target_ip: None,
        activated_hostname: None,
        activated_ip: None,
        hardware_id: None,
        hwid_salt: None,
        raw_hwid_fingerprint: None,
        used_at: None,
        created_at: now,
    }
}
