//! License lifecycle: creation, provisioning, verification and admin actions.
//!
//! Status changes go through [`LicenseStatus::can_transition`]. Automatic
//! triggers (provision, expiry detection, heartbeat) may only make the moves
//! the state machine allows; admin actions use [`Trigger::Manual`].

use crate::audit::AuditTrail;
use crate::repos::Repositories;
use chrono::{DateTime, Duration, Utc};
use leasehold_core::activity::{ActivityLog, AuditAction, NewActivityLog};
use leasehold_core::clock::Clock;
use leasehold_core::codec::{LicensePayload, PayloadCodec, build_payload};
use leasehold_core::fingerprint::{digest_raw, generate_salt, short_hwid};
use leasehold_core::ids::{LicenseRecordId, PatchTokenId, ServerId};
use leasehold_core::license::{License, LicenseEdit, LicenseStatus, NewLicense, TokenEntitlement, Trigger};
use leasehold_core::ports::{DeployReport, Deployer};
use leasehold_core::server::Server;
use leasehold_core::validation::{Validate, require_hwid, require_non_empty};
use leasehold_core::{Error, Result};
use leasehold_deploy::ScriptRenderer;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Window used by [`Stats::expiring_soon`].
const EXPIRY_WARNING_DAYS: i64 = 7;

/// Number of audit entries returned by the activity endpoints.
pub const ACTIVITY_PAGE: u32 = 100;

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionScripts {
    pub agent: String,
    pub verify: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionResult {
    pub license: LicensePayload,
    pub encrypted_blob: String,
    pub scripts: ProvisionScripts,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyOutcome {
    pub valid: bool,
    pub status: LicenseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<LicensePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_blob: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerifyOutcome {
    fn rejected(status: LicenseStatus, error: impl Into<String>) -> Self {
        Self {
            valid: false,
            status,
            license: None,
            encrypted_blob: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub total_licenses: usize,
    pub active_licenses: usize,
    pub total_servers: usize,
    pub connected_servers: usize,
    pub expiring_soon: usize,
}

pub struct LicenseService {
    repos: Repositories,
    deployer: Arc<dyn Deployer>,
    codec: Arc<dyn PayloadCodec>,
    scripts: ScriptRenderer,
    audit: AuditTrail,
    clock: Arc<dyn Clock>,
}

fn normalize_hwid(hardware_id: &str) -> Result<String> {
    let hwid = hardware_id.trim().to_ascii_lowercase();
    require_hwid("hardware_id", &hwid)?;
    Ok(hwid)
}

impl LicenseService {
    pub fn new(
        repos: Repositories,
        deployer: Arc<dyn Deployer>,
        codec: Arc<dyn PayloadCodec>,
        scripts: ScriptRenderer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            audit: AuditTrail::new(repos.activity.clone(), clock.clone()),
            repos,
            deployer,
            codec,
            scripts,
            clock,
        }
    }

    pub fn codec(&self) -> &dyn PayloadCodec {
        self.codec.as_ref()
    }

    // Lookups

    pub async fn get(&self, id: LicenseRecordId) -> Result<License> {
        self.repos
            .licenses
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("license", id.to_string()))
    }

    pub async fn get_by_name(&self, license_id: &str) -> Result<License> {
        self.repos
            .licenses
            .get_by_license_id(license_id)
            .await?
            .ok_or_else(|| Error::not_found("license", license_id))
    }

    pub async fn list(&self) -> Result<Vec<License>> {
        self.repos.licenses.list().await
    }

    pub async fn activity(&self) -> Result<Vec<ActivityLog>> {
        self.repos.activity.recent(ACTIVITY_PAGE).await
    }

    pub async fn license_activity(&self, id: LicenseRecordId) -> Result<Vec<ActivityLog>> {
        self.get(id).await?;
        self.repos.activity.for_license(id, ACTIVITY_PAGE).await
    }

    pub async fn stats(&self) -> Result<Stats> {
        let now = self.clock.now_utc();
        let horizon = now + Duration::days(EXPIRY_WARNING_DAYS);
        let licenses = self.repos.licenses.list().await?;
        let servers = self.repos.servers.list().await?;

        Ok(Stats {
            total_licenses: licenses.len(),
            active_licenses: licenses
                .iter()
                .filter(|l| l.status == LicenseStatus::Active)
                .count(),
            total_servers: servers.len(),
            connected_servers: servers.iter().filter(|s| s.is_connected).count(),
            expiring_soon: licenses
                .iter()
                .filter(|l| l.status == LicenseStatus::Active)
                .filter(|l| l.expires_at > now && l.expires_at <= horizon)
                .count(),
        })
    }

    async fn server(&self, id: ServerId) -> Result<Server> {
        self.repos
            .servers
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("server", id.to_string()))
    }

    async fn save(&self, license: &mut License) -> Result<()> {
        license.updated_at = self.clock.now_utc();
        self.repos.licenses.update(license).await
    }

    /// Flip a license past its expiry to `expired`. Returns whether it is expired.
    async fn expire_if_due(&self, license: &mut License) -> Result<bool> {
        let now = self.clock.now_utc();
        if license.status == LicenseStatus::Expired {
            return Ok(true);
        }
        if !license.is_past_expiry(now)
            || !license
                .status
                .can_transition(LicenseStatus::Expired, Trigger::ExpiryCheck)
        {
            return Ok(false);
        }

        license.status = LicenseStatus::Expired;
        self.save(license).await?;
        info!(license_id = %license.license_id, "License expired");
        self.audit
            .record(
                NewActivityLog::new(AuditAction::ExpireLicense, "License passed its expiry date")
                    .license(license.id)
                    .server(license.server_id),
            )
            .await?;
        Ok(true)
    }

    async fn reject_mismatch(
        &self,
        license: &License,
        bound: &str,
        received: &str,
        action: AuditAction,
    ) -> Error {
        self.audit
            .record_quietly(
                NewActivityLog::new(
                    action,
                    format!(
                        "Hardware mismatch: expected {}, received {}",
                        short_hwid(bound),
                        short_hwid(received)
                    ),
                )
                .license(license.id)
                .server(license.server_id),
            )
            .await;
        Error::SecurityMismatch {
            license_id: license.license_id.clone(),
            expected: bound.to_string(),
            received: received.to_string(),
        }
    }

    // Admin actions

    pub async fn create(&self, input: NewLicense) -> Result<License> {
        input.validate()?;
        if self
            .repos
            .licenses
            .get_by_license_id(&input.license_id)
            .await?
            .is_some()
        {
            return Err(Error::Conflict(format!(
                "license '{}' already exists",
                input.license_id
            )));
        }

        let salt = generate_salt();
        let hardware_id = match input.server_id {
            Some(server_id) => self
                .server(server_id)
                .await?
                .hardware_id
                .map(|raw| digest_raw(&raw, &salt)),
            None => None,
        };
        let now = self.clock.now_utc();
        let license = License {
            id: LicenseRecordId::new(),
            license_id: input.license_id,
            server_id: input.server_id,
            status: if hardware_id.is_some() {
                LicenseStatus::Active
            } else {
                LicenseStatus::Inactive
            },
            hardware_id,
            hwid_salt: salt,
            expires_at: input.expires_at,
            max_users: input.max_users,
            max_sites: input.max_sites,
            client_id: input.client_id,
            notes: input.notes,
            signature: None,
            last_verified_at: None,
            created_at: now,
            updated_at: now,
        };
        self.repos.licenses.insert(&license).await?;

        info!(license_id = %license.license_id, status = %license.status, "License created");
        self.audit
            .record(
                NewActivityLog::new(
                    AuditAction::CreateLicense,
                    format!("License {} created ({})", license.license_id, license.status),
                )
                .license(license.id)
                .server(license.server_id),
            )
            .await?;
        Ok(license)
    }

    /// Issue a license for a host registered through a patch token.
    pub async fn create_from_token(
        &self,
        token_id: PatchTokenId,
        entitlement: TokenEntitlement,
    ) -> Result<License> {
        entitlement.validate()?;
        let token = self
            .repos
            .patch_tokens
            .get(token_id)
            .await?
            .ok_or_else(|| Error::not_found("patch token", token_id.to_string()))?;
        if !token.is_awaiting_license() {
            return Err(Error::Conflict(format!(
                "patch token is {} and cannot issue a license",
                if token.license_id.is_some() {
                    "already licensed"
                } else {
                    token.status.as_str()
                }
            )));
        }
        let (Some(hardware_id), Some(salt)) = (token.hardware_id.clone(), token.hwid_salt.clone())
        else {
            return Err(Error::Conflict(
                "patch token has no recorded hardware".to_string(),
            ));
        };
        if self
            .repos
            .licenses
            .get_by_license_id(&entitlement.license_id)
            .await?
            .is_some()
        {
            return Err(Error::Conflict(format!(
                "license '{}' already exists",
                entitlement.license_id
            )));
        }

        let now = self.clock.now_utc();
        let license = License {
            id: LicenseRecordId::new(),
            license_id: entitlement.license_id,
            server_id: token.server_id,
            hardware_id: Some(hardware_id.clone()),
            hwid_salt: salt,
            status: LicenseStatus::Active,
            expires_at: entitlement
                .expires_at
                .unwrap_or_else(|| now + Duration::days(token.duration_days.into())),
            max_users: entitlement.max_users.unwrap_or(token.max_users),
            max_sites: entitlement.max_sites.unwrap_or(token.max_sites),
            client_id: entitlement.client_id,
            notes: entitlement.notes.or_else(|| token.notes.clone()),
            signature: None,
            last_verified_at: None,
            created_at: now,
            updated_at: now,
        };
        // Fails without inserting when a concurrent call already redeemed the token.
        self.repos
            .patch_tokens
            .issue_license(token.id, &license)
            .await?;

        info!(
            license_id = %license.license_id,
            person = %token.person_name,
            hwid = short_hwid(&hardware_id),
            "License issued from patch token"
        );
        self.audit
            .record(
                NewActivityLog::new(
                    AuditAction::LicenseFromPatch,
                    format!(
                        "License {} issued to {} ({})",
                        license.license_id,
                        token.person_name,
                        token.activated_hostname.as_deref().unwrap_or("unknown host")
                    ),
                )
                .license(license.id)
                .server(license.server_id),
            )
            .await?;
        Ok(license)
    }

    pub async fn extend(&self, id: LicenseRecordId, days: i64) -> Result<License> {
        if days < 1 {
            return Err(Error::invalid("days", "must be at least 1"));
        }
        let mut license = self.get(id).await?;
        license.expires_at = Duration::try_days(days)
            .and_then(|d| license.expires_at.checked_add_signed(d))
            .ok_or_else(|| Error::invalid("days", "extension overflows the calendar"))?;
        self.save(&mut license).await?;

        self.audit
            .record(
                NewActivityLog::new(
                    AuditAction::ExtendLicense,
                    format!(
                        "Extended by {days} days to {}",
                        license.expires_at.format("%Y-%m-%d %H:%M:%S")
                    ),
                )
                .license(license.id)
                .server(license.server_id),
            )
            .await?;
        Ok(license)
    }

    pub async fn transfer(&self, id: LicenseRecordId, server_id: ServerId) -> Result<License> {
        let mut license = self.get(id).await?;
        let server = self.server(server_id).await?;

        if let Some(other) = self.repos.licenses.get_by_server(server_id).await?
            && other.id != license.id
        {
            return Err(Error::Conflict(format!(
                "server {} already hosts license {}",
                server.name, other.license_id
            )));
        }

        let previous = license.server_id;
        license.server_id = Some(server_id);
        license.hardware_id = server
            .hardware_id
            .as_deref()
            .map(|raw| digest_raw(raw, &license.hwid_salt));
        self.save(&mut license).await?;

        info!(license_id = %license.license_id, server = %server.name, "License transferred");
        self.audit
            .record(
                NewActivityLog::new(
                    AuditAction::TransferLicense,
                    format!(
                        "Transferred to {} (from {})",
                        server.name,
                        previous.map_or_else(|| "none".to_string(), |s| s.to_string())
                    ),
                )
                .license(license.id)
                .server(Some(server_id)),
            )
            .await?;

        if license.status == LicenseStatus::Active && license.hardware_id.is_some() {
            self.redeploy(&license).await;
        }
        Ok(license)
    }

    pub async fn edit(&self, id: LicenseRecordId, edit: LicenseEdit) -> Result<License> {
        edit.validate()?;
        let mut license = self.get(id).await?;
        edit.apply(&mut license);
        self.save(&mut license).await?;

        self.audit
            .record(
                NewActivityLog::new(
                    AuditAction::EditLicense,
                    format!("Updated {}", edit.touched_fields().join(", ")),
                )
                .license(license.id)
                .server(license.server_id),
            )
            .await?;
        Ok(license)
    }

    /// Admin override. The redeploy that follows never rolls the change back.
    pub async fn set_status(&self, id: LicenseRecordId, status: LicenseStatus) -> Result<License> {
        let mut license = self.get(id).await?;
        if !license.status.can_transition(status, Trigger::Manual) {
            return Err(Error::invalid("status", format!("cannot move to {status}")));
        }
        let previous = license.status;
        license.status = status;
        self.save(&mut license).await?;

        let action = match status {
            LicenseStatus::Active => AuditAction::ActivateLicense,
            LicenseStatus::Inactive => AuditAction::DeactivateLicense,
            LicenseStatus::Suspended => AuditAction::SuspendLicense,
            LicenseStatus::Expired => AuditAction::ExpireLicense,
        };
        info!(license_id = %license.license_id, from = %previous, to = %status, "License status changed");
        self.audit
            .record(
                NewActivityLog::new(action, format!("Status changed from {previous} to {status}"))
                    .license(license.id)
                    .server(license.server_id),
            )
            .await?;

        if license.server_id.is_some() && license.hardware_id.is_some() {
            self.redeploy(&license).await;
        }
        Ok(license)
    }

    pub async fn deploy(&self, id: LicenseRecordId) -> Result<DeployReport> {
        let mut license = self.get(id).await?;
        let server_id = license
            .server_id
            .ok_or_else(|| Error::invalid("server_id", "license is not assigned to a server"))?;
        let server = self.server(server_id).await?;

        let report = match self.deployer.deploy(&server, &license).await {
            Ok(report) => report,
            Err(e) => {
                self.audit
                    .record_quietly(
                        NewActivityLog::new(AuditAction::DeployFailed, e.to_string())
                            .license(license.id)
                            .server(Some(server_id)),
                    )
                    .await;
                return Err(e);
            }
        };

        if !report.success {
            warn!(license_id = %license.license_id, error = ?report.error, "Deploy failed");
            self.audit
                .record(
                    NewActivityLog::new(
                        AuditAction::DeployFailed,
                        report.error.clone().unwrap_or_default(),
                    )
                    .license(license.id)
                    .server(Some(server_id)),
                )
                .await?;
            return Ok(report);
        }

        if license.hardware_id.is_none()
            && let Some(observed) = &report.hardware_id
        {
            license.hardware_id = Some(observed.clone());
            license.last_verified_at = Some(self.clock.now_utc());
            if license
                .status
                .can_transition(LicenseStatus::Active, Trigger::Provision)
            {
                license.status = LicenseStatus::Active;
            }
            self.save(&mut license).await?;
        }

        self.audit
            .record(
                NewActivityLog::new(
                    AuditAction::DeployLicense,
                    format!("Deployed to {}", server.name),
                )
                .license(license.id)
                .server(Some(server_id)),
            )
            .await?;
        Ok(report)
    }

    pub async fn undeploy(&self, id: LicenseRecordId) -> Result<DeployReport> {
        let license = self.get(id).await?;
        let server_id = license
            .server_id
            .ok_or_else(|| Error::invalid("server_id", "license is not assigned to a server"))?;
        let server = self.server(server_id).await?;

        let report = self.deployer.undeploy(&server).await?;
        let details = match &report.error {
            None => format!("Removed from {}", server.name),
            Some(e) => format!("Removal from {} failed: {e}", server.name),
        };
        self.audit
            .record(
                NewActivityLog::new(AuditAction::UndeployLicense, details)
                    .license(license.id)
                    .server(Some(server_id)),
            )
            .await?;
        Ok(report)
    }

    /// Soft delete: suspend, detach from the server, and remove the agent best-effort.
    pub async fn delete(&self, id: LicenseRecordId) -> Result<()> {
        let mut license = self.get(id).await?;
        let previous_server = license.server_id.take();
        license.status = LicenseStatus::Suspended;
        self.save(&mut license).await?;

        self.audit
            .record(
                NewActivityLog::new(
                    AuditAction::DeleteLicense,
                    format!("License {} deleted", license.license_id),
                )
                .license(license.id)
                .server(previous_server),
            )
            .await?;

        if let Some(server_id) = previous_server {
            match self.server(server_id).await {
                Ok(server) => match self.deployer.undeploy(&server).await {
                    Ok(report) if report.success => {}
                    Ok(report) => {
                        warn!(license_id = %license.license_id, error = ?report.error, "Cleanup after delete failed")
                    }
                    Err(e) => {
                        warn!(license_id = %license.license_id, error = %e, "Cleanup after delete failed")
                    }
                },
                Err(e) => warn!(error = %e, "Server vanished before cleanup"),
            }
        }
        Ok(())
    }

    /// Push the current license to its server, logging rather than failing.
    async fn redeploy(&self, license: &License) {
        let Some(server_id) = license.server_id else {
            return;
        };
        let server = match self.server(server_id).await {
            Ok(server) => server,
            Err(e) => {
                warn!(license_id = %license.license_id, error = %e, "Redeploy skipped");
                return;
            }
        };

        let (action, details) = match self.deployer.deploy(&server, license).await {
            Ok(report) if report.success => (
                AuditAction::DeployLicense,
                format!("Redeployed to {}", server.name),
            ),
            Ok(report) => (
                AuditAction::DeployFailed,
                report.error.unwrap_or_else(|| "deploy failed".to_string()),
            ),
            Err(e) => (AuditAction::DeployFailed, e.to_string()),
        };
        if action == AuditAction::DeployFailed {
            warn!(license_id = %license.license_id, server = %server.name, %details, "Redeploy failed");
        }
        self.audit
            .record_quietly(
                NewActivityLog::new(action, details)
                    .license(license.id)
                    .server(Some(server_id)),
            )
            .await;
    }

    pub async fn install_script(&self, license_id: &str) -> Result<String> {
        let license = self.get_by_name(license_id).await?;
        Ok(self.scripts.install_script(&license))
    }

    // Target-facing protocol

    /// Bind (first call) or confirm (later calls) a license to a host.
    pub async fn provision(&self, license_id: &str, hardware_id: &str) -> Result<ProvisionResult> {
        require_non_empty("license_id", license_id)?;
        let hwid = normalize_hwid(hardware_id)?;

        // Re-runs only when another host bound the license between our read and write.
        let (license, payload, blob, first_bind) = loop {
            let mut license = self.get_by_name(license_id).await?;

            if self.expire_if_due(&mut license).await? {
                return Err(Error::Expired(license.license_id));
            }
            if license.status == LicenseStatus::Suspended {
                return Err(Error::Suspended(license.license_id));
            }
            if let Some(bound) = license.hardware_id.clone()
                && bound != hwid
            {
                return Err(self
                    .reject_mismatch(&license, &bound, &hwid, AuditAction::ProvisionHwidMismatch)
                    .await);
            }

            let first_bind = license.hardware_id.is_none();
            license.hardware_id = Some(hwid.clone());
            license.last_verified_at = Some(self.clock.now_utc());
            if license
                .status
                .can_transition(LicenseStatus::Active, Trigger::Provision)
            {
                license.status = LicenseStatus::Active;
            }
            let payload = build_payload(&license, &hwid);
            let blob = self.codec.encode(&payload)?;
            license.signature = Some(blob.clone());

            if first_bind {
                license.updated_at = self.clock.now_utc();
                if !self.repos.licenses.bind_hardware(&license).await? {
                    continue;
                }
            } else {
                self.save(&mut license).await?;
            }
            break (license, payload, blob, first_bind);
        };

        info!(license_id = %license.license_id, hwid = short_hwid(&hwid), first_bind, "License provisioned");
        self.audit
            .record(
                NewActivityLog::new(
                    AuditAction::ProvisionLicense,
                    format!(
                        "{} hardware {}",
                        if first_bind { "Bound to" } else { "Confirmed" },
                        short_hwid(&hwid)
                    ),
                )
                .license(license.id)
                .server(license.server_id),
            )
            .await?;

        Ok(ProvisionResult {
            license: payload,
            encrypted_blob: blob,
            scripts: ProvisionScripts {
                agent: self.scripts.agent_script(&license.license_id),
                verify: self.scripts.verifier_script(&license),
            },
        })
    }

    pub async fn verify(&self, license_id: &str, hardware_id: &str) -> Result<VerifyOutcome> {
        require_non_empty("license_id", license_id)?;
        let hwid = normalize_hwid(hardware_id)?;
        let mut license = self.get_by_name(license_id).await?;

        let Some(bound) = license.hardware_id.clone() else {
            return Err(Error::NotProvisioned(license.license_id));
        };
        if bound != hwid {
            return Err(self
                .reject_mismatch(&license, &bound, &hwid, AuditAction::VerifyHwidMismatch)
                .await);
        }

        if self.expire_if_due(&mut license).await? {
            self.audit
                .record(
                    NewActivityLog::new(AuditAction::VerifyExpired, "Verification of expired license")
                        .license(license.id)
                        .server(license.server_id),
                )
                .await?;
            return Ok(VerifyOutcome::rejected(LicenseStatus::Expired, "license expired"));
        }

        match license.status {
            LicenseStatus::Suspended => {
                self.audit
                    .record(
                        NewActivityLog::new(
                            AuditAction::VerifySuspended,
                            "Verification of suspended license, serving read-only",
                        )
                        .license(license.id)
                        .server(license.server_id),
                    )
                    .await?;
                Ok(VerifyOutcome {
                    valid: true,
                    status: LicenseStatus::Suspended,
                    license: Some(build_payload(&license, &hwid)),
                    encrypted_blob: None,
                    error: None,
                })
            }
            LicenseStatus::Active => {
                license.last_verified_at = Some(self.clock.now_utc());
                let payload = build_payload(&license, &hwid);
                let blob = self.codec.encode(&payload)?;
                license.signature = Some(blob.clone());
                self.save(&mut license).await?;
                self.audit
                    .record(
                        NewActivityLog::new(AuditAction::VerifySuccess, "Verified")
                            .license(license.id)
                            .server(license.server_id),
                    )
                    .await?;
                Ok(VerifyOutcome {
                    valid: true,
                    status: LicenseStatus::Active,
                    license: Some(payload),
                    encrypted_blob: Some(blob),
                    error: None,
                })
            }
            status => Ok(VerifyOutcome::rejected(status, format!("license is {status}"))),
        }
    }

    /// Payload served to a deployed agent. Suspended licenses are served read-only.
    pub async fn license_data(&self, license_id: &str) -> Result<LicensePayload> {
        let mut license = self.get_by_name(license_id).await?;
        let Some(hwid) = license.hardware_id.clone() else {
            return Err(Error::NotProvisioned(license.license_id));
        };
        if self.expire_if_due(&mut license).await? {
            return Err(Error::Expired(license.license_id));
        }
        match license.status {
            LicenseStatus::Active | LicenseStatus::Suspended => Ok(build_payload(&license, &hwid)),
            LicenseStatus::Inactive => Err(Error::Inactive(license.license_id)),
            LicenseStatus::Expired => Err(Error::Expired(license.license_id)),
        }
    }

    /// Encoded payload for an active license.
    pub async fn license_blob(&self, license_id: &str) -> Result<String> {
        let payload = self.license_data(license_id).await?;
        if !payload.is_active() {
            return Err(Error::Suspended(payload.license_id));
        }
        self.codec.encode(&payload)
    }

    /// Expiry time `days` from now, for callers building a [`NewLicense`].
    pub fn days_from_now(&self, days: i64) -> DateTime<Utc> {
        self.clock.now_utc() + Duration::days(days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;

    #[tokio::test]
    async fn test_create_without_server_is_inactive() {
        let h = Harness::new();
        let license = h.create_license("LIC-1", None).await;
        assert_eq!(license.status, LicenseStatus::Inactive);
        assert_eq!(license.hwid_salt.len(), 32);
        assert!(license.hardware_id.is_none());

        let dup = h
            .licenses
            .create(h.new_license("LIC-1", None))
            .await
            .unwrap_err();
        assert!(matches!(dup, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_create_on_probed_server_is_active() {
        let h = Harness::new();
        let server = h.probed_server("edge-1", "machine-a").await;
        let license = h.create_license("LIC-1", Some(server.id)).await;

        assert_eq!(license.status, LicenseStatus::Active);
        let raw = server.hardware_id.unwrap();
        assert_eq!(license.hardware_id, Some(digest_raw(&raw, &license.hwid_salt)));
    }

    #[tokio::test]
    async fn test_create_rejects_second_license_on_server() {
        let h = Harness::new();
        let server = h.probed_server("edge-1", "machine-a").await;
        h.create_license("LIC-1", Some(server.id)).await;
        let err = h
            .licenses
            .create(h.new_license("LIC-2", Some(server.id)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_provision_is_idempotent_and_first_bind_wins() {
        let h = Harness::new();
        h.create_license("LIC-1", None).await;
        let a = "a".repeat(64);
        let b = "b".repeat(64);

        let first = h.licenses.provision("LIC-1", &a).await.unwrap();
        assert_eq!(first.license.hardware_id, a);
        assert!(first.scripts.agent.contains("LIC-1"));
        let after_first = h.licenses.get_by_name("LIC-1").await.unwrap();
        assert_eq!(after_first.status, LicenseStatus::Active);

        h.clock.advance(Duration::minutes(5));
        h.licenses.provision("LIC-1", &a.to_uppercase()).await.unwrap();
        let after_second = h.licenses.get_by_name("LIC-1").await.unwrap();
        assert_eq!(after_second.hardware_id, Some(a.clone()));
        assert!(after_second.last_verified_at > after_first.last_verified_at);

        let err = h.licenses.provision("LIC-1", &b).await.unwrap_err();
        assert!(matches!(err, Error::SecurityMismatch { .. }));
        assert_eq!(
            h.licenses.get_by_name("LIC-1").await.unwrap().hardware_id,
            Some(a)
        );
        assert!(h.has_audit(AuditAction::ProvisionHwidMismatch).await);
    }

    #[tokio::test]
    async fn test_concurrent_first_provisions_bind_once() {
        let h = Harness::interleaved();
        h.create_license("LIC-1", None).await;
        let a = "a".repeat(64);
        let b = "b".repeat(64);

        let (first, second) = tokio::join!(
            h.licenses.provision("LIC-1", &a),
            h.licenses.provision("LIC-1", &b),
        );
        assert_eq!(first.unwrap().license.hardware_id, a);
        assert!(matches!(second, Err(Error::SecurityMismatch { .. })));
        assert_eq!(
            h.licenses.get_by_name("LIC-1").await.unwrap().hardware_id,
            Some(a)
        );
        assert!(h.has_audit(AuditAction::ProvisionHwidMismatch).await);
    }

    #[tokio::test]
    async fn test_provision_blob_decodes_to_payload() {
        let h = Harness::new();
        h.create_license("LIC-1", None).await;
        let result = h.licenses.provision("LIC-1", &"c".repeat(64)).await.unwrap();
        let decoded = h.licenses.codec().decode(&result.encrypted_blob).unwrap();
        assert_eq!(decoded, result.license);
    }

    #[tokio::test]
    async fn test_provision_rejects_expired_and_suspended() {
        let h = Harness::new();
        let license = h.create_license("LIC-1", None).await;
        h.licenses
            .set_status(license.id, LicenseStatus::Suspended)
            .await
            .unwrap();
        let err = h.licenses.provision("LIC-1", &"a".repeat(64)).await.unwrap_err();
        assert!(matches!(err, Error::Suspended(_)));

        h.create_license("LIC-2", None).await;
        h.clock.advance(Duration::days(31));
        let err = h.licenses.provision("LIC-2", &"a".repeat(64)).await.unwrap_err();
        assert!(matches!(err, Error::Expired(_)));
        assert_eq!(
            h.licenses.get_by_name("LIC-2").await.unwrap().status,
            LicenseStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_provision_validates_input() {
        let h = Harness::new();
        h.create_license("LIC-1", None).await;
        let err = h.licenses.provision("LIC-1", "not-a-hash").await.unwrap_err();
        match err {
            Error::Validation(field) => assert_eq!(field.field, "hardware_id"),
            other => panic!("unexpected {other:?}"),
        }
        let err = h.licenses.provision("LIC-404", &"a".repeat(64)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_verify_paths() {
        let h = Harness::new();
        let license = h.create_license("LIC-1", None).await;
        let a = "a".repeat(64);

        let err = h.licenses.verify("LIC-1", &a).await.unwrap_err();
        assert!(matches!(err, Error::NotProvisioned(_)));

        h.licenses.provision("LIC-1", &a).await.unwrap();
        let ok = h.licenses.verify("LIC-1", &a).await.unwrap();
        assert!(ok.valid);
        assert_eq!(ok.status, LicenseStatus::Active);
        assert!(ok.encrypted_blob.is_some());

        let err = h.licenses.verify("LIC-1", &"b".repeat(64)).await.unwrap_err();
        assert!(matches!(err, Error::SecurityMismatch { .. }));
        assert!(h.has_audit(AuditAction::VerifyHwidMismatch).await);

        h.licenses
            .set_status(license.id, LicenseStatus::Inactive)
            .await
            .unwrap();
        let inactive = h.licenses.verify("LIC-1", &a).await.unwrap();
        assert!(!inactive.valid);
        assert_eq!(inactive.status, LicenseStatus::Inactive);
    }

    #[tokio::test]
    async fn test_verify_suspended_serves_read_only() {
        let h = Harness::new();
        let license = h.create_license("LIC-1", None).await;
        let a = "a".repeat(64);
        h.licenses.provision("LIC-1", &a).await.unwrap();
        h.licenses
            .set_status(license.id, LicenseStatus::Suspended)
            .await
            .unwrap();

        let outcome = h.licenses.verify("LIC-1", &a).await.unwrap();
        assert!(outcome.valid);
        assert_eq!(outcome.status, LicenseStatus::Suspended);
        assert_eq!(outcome.license.unwrap().status_flag, "0");
    }

    #[tokio::test]
    async fn test_verify_expired_flips_status() {
        let h = Harness::new();
        h.create_license("LIC-1", None).await;
        let a = "a".repeat(64);
        h.licenses.provision("LIC-1", &a).await.unwrap();
        h.clock.advance(Duration::days(31));

        let outcome = h.licenses.verify("LIC-1", &a).await.unwrap();
        assert!(!outcome.valid);
        assert_eq!(outcome.status, LicenseStatus::Expired);
        assert_eq!(
            h.licenses.get_by_name("LIC-1").await.unwrap().status,
            LicenseStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_license_data_and_blob() {
        let h = Harness::new();
        let license = h.create_license("LIC-1", None).await;
        assert!(matches!(
            h.licenses.license_data("LIC-1").await.unwrap_err(),
            Error::NotProvisioned(_)
        ));

        h.licenses.provision("LIC-1", &"a".repeat(64)).await.unwrap();
        assert!(h.licenses.license_data("LIC-1").await.unwrap().is_active());
        assert!(h.licenses.license_blob("LIC-1").await.is_ok());

        h.licenses
            .set_status(license.id, LicenseStatus::Suspended)
            .await
            .unwrap();
        assert_eq!(
            h.licenses.license_data("LIC-1").await.unwrap().status_flag,
            "0"
        );
        assert!(matches!(
            h.licenses.license_blob("LIC-1").await.unwrap_err(),
            Error::Suspended(_)
        ));

        h.licenses
            .set_status(license.id, LicenseStatus::Inactive)
            .await
            .unwrap();
        assert!(matches!(
            h.licenses.license_data("LIC-1").await.unwrap_err(),
            Error::Inactive(_)
        ));
    }

    #[tokio::test]
    async fn test_extend_adds_exact_seconds_only() {
        let h = Harness::new();
        let before = h.create_license("LIC-1", None).await;
        let after = h.licenses.extend(before.id, 10).await.unwrap();

        assert_eq!(
            (after.expires_at - before.expires_at).num_seconds(),
            10 * 86_400
        );
        assert_eq!(after.status, before.status);
        assert_eq!(after.hardware_id, before.hardware_id);
        assert_eq!(after.max_users, before.max_users);

        assert!(matches!(
            h.licenses.extend(before.id, 0).await.unwrap_err(),
            Error::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_transfer_rebinds_and_refuses_occupied_server() {
        let h = Harness::new();
        let first = h.probed_server("edge-1", "machine-a").await;
        let second = h.probed_server("edge-2", "machine-b").await;
        let lic1 = h.create_license("LIC-1", Some(first.id)).await;
        let lic2 = h.create_license("LIC-2", None).await;

        let err = h.licenses.transfer(lic2.id, first.id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let moved = h.licenses.transfer(lic1.id, second.id).await.unwrap();
        assert_eq!(moved.server_id, Some(second.id));
        assert_eq!(
            moved.hardware_id,
            Some(digest_raw(second.hardware_id.as_deref().unwrap(), &moved.hwid_salt))
        );
        // active and bound, so the agent is redeployed to the new host
        assert!(h.has_audit(AuditAction::DeployLicense).await);
    }

    #[tokio::test]
    async fn test_transfer_to_unprobed_server_clears_hwid() {
        let h = Harness::new();
        let probed = h.probed_server("edge-1", "machine-a").await;
        let fresh = h.server("edge-2").await;
        let license = h.create_license("LIC-1", Some(probed.id)).await;

        let moved = h.licenses.transfer(license.id, fresh.id).await.unwrap();
        assert!(moved.hardware_id.is_none());
    }

    #[tokio::test]
    async fn test_edit() {
        let h = Harness::new();
        let license = h.create_license("LIC-1", None).await;
        let edited = h
            .licenses
            .edit(
                license.id,
                LicenseEdit {
                    max_users: Some(500),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.max_users, 500);
        assert!(h.licenses.edit(license.id, LicenseEdit::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_status_change_survives_failed_redeploy() {
        let h = Harness::new();
        let server = h.probed_server("edge-1", "machine-a").await;
        let license = h.create_license("LIC-1", Some(server.id)).await;
        h.executor.fail_scripts("disk full");

        let updated = h
            .licenses
            .set_status(license.id, LicenseStatus::Suspended)
            .await
            .unwrap();
        assert_eq!(updated.status, LicenseStatus::Suspended);
        assert!(h.has_audit(AuditAction::DeployFailed).await);
    }

    #[tokio::test]
    async fn test_deploy_binds_unbound_license() {
        let h = Harness::new();
        let server = h.server("edge-1").await;
        h.set_target_machine("machine-a");
        let license = h.create_license("LIC-1", Some(server.id)).await;
        assert_eq!(license.status, LicenseStatus::Inactive);

        let report = h.licenses.deploy(license.id).await.unwrap();
        assert!(report.success);
        let stored = h.licenses.get(license.id).await.unwrap();
        assert_eq!(stored.hardware_id, report.hardware_id);
        assert_eq!(stored.status, LicenseStatus::Active);
    }

    #[tokio::test]
    async fn test_deploy_mismatch_is_refused() {
        let h = Harness::new();
        let server = h.probed_server("edge-1", "machine-a").await;
        let license = h.create_license("LIC-1", Some(server.id)).await;
        h.set_target_machine("machine-b");

        let err = h.licenses.deploy(license.id).await.unwrap_err();
        assert!(matches!(err, Error::SecurityMismatch { .. }));
        assert!(h.has_audit(AuditAction::DeployFailed).await);
    }

    #[tokio::test]
    async fn test_deploy_requires_server() {
        let h = Harness::new();
        let license = h.create_license("LIC-1", None).await;
        assert!(matches!(
            h.licenses.deploy(license.id).await.unwrap_err(),
            Error::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_delete_is_soft() {
        let h = Harness::new();
        let server = h.probed_server("edge-1", "machine-a").await;
        let license = h.create_license("LIC-1", Some(server.id)).await;

        h.licenses.delete(license.id).await.unwrap();
        let stored = h.licenses.get(license.id).await.unwrap();
        assert_eq!(stored.status, LicenseStatus::Suspended);
        assert!(stored.server_id.is_none());
        assert!(h.executor.commands().iter().any(|c| c.contains("base64 -d")));

        // the server is free again
        h.create_license("LIC-2", Some(server.id)).await;
    }

    #[tokio::test]
    async fn test_stats() {
        let h = Harness::new();
        let server = h.probed_server("edge-1", "machine-a").await;
        h.create_license("LIC-1", Some(server.id)).await;
        h.create_license("LIC-2", None).await;
        let mut soon = h.new_license("LIC-3", None);
        soon.expires_at = h.licenses.days_from_now(3);
        let soon = h.licenses.create(soon).await.unwrap();
        h.licenses.set_status(soon.id, LicenseStatus::Active).await.unwrap();

        let stats = h.licenses.stats().await.unwrap();
        assert_eq!(stats.total_licenses, 3);
        assert_eq!(stats.active_licenses, 2);
        assert_eq!(stats.connected_servers, 1);
        assert_eq!(stats.expiring_soon, 1);
    }

    #[tokio::test]
    async fn test_install_script_uses_license_salt() {
        let h = Harness::new();
        let license = h.create_license("LIC-1", None).await;
        let script = h.licenses.install_script("LIC-1").await.unwrap();
        assert!(script.contains(&license.hwid_salt));
        assert!(script.contains("/api/provision"));
    }
}
