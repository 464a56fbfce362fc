//! Two-phase onboarding for hosts that are not reachable over SSH.
//!
//! An admin creates a token; the target runs the patch script, which reports
//! its raw fingerprint back. The token then waits until an admin issues a
//! license for it through [`LicenseService::create_from_token`].
//!
//! [`LicenseService::create_from_token`]: crate::service::LicenseService::create_from_token

use crate::audit::AuditTrail;
use leasehold_core::activity::{AuditAction, NewActivityLog};
use leasehold_core::clock::Clock;
use leasehold_core::fingerprint::{SEPARATOR, digest_raw, generate_salt, short_hwid};
use leasehold_core::ids::PatchTokenId;
use leasehold_core::patch::{NewPatchToken, PatchStatus, PatchToken, generate_token};
use leasehold_core::ports::{ActivityLogRepository, PatchTokenRepository};
use leasehold_core::validation::Validate;
use leasehold_core::{Error, Result};
use leasehold_deploy::ScriptRenderer;
use std::sync::Arc;
use tracing::{info, warn};

pub struct PatchService {
    tokens: Arc<dyn PatchTokenRepository>,
    audit: AuditTrail,
    scripts: ScriptRenderer,
    clock: Arc<dyn Clock>,
}

impl PatchService {
    pub fn new(
        tokens: Arc<dyn PatchTokenRepository>,
        activity: Arc<dyn ActivityLogRepository>,
        scripts: ScriptRenderer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tokens,
            audit: AuditTrail::new(activity, clock.clone()),
            scripts,
            clock,
        }
    }

    pub async fn create_token(&self, input: NewPatchToken) -> Result<PatchToken> {
        input.validate()?;
        let token = PatchToken {
            id: PatchTokenId::new(),
            token: generate_token(),
            person_name: input.person_name,
            max_users: input.max_users,
            max_sites: input.max_sites,
            duration_days: input.duration_days,
            status: PatchStatus::Pending,
            license_id: None,
            server_id: input.server_id,
            notes: input.notes,
            target_ip: input.target_ip,
            activated_hostname: None,
            activated_ip: None,
            hardware_id: None,
            hwid_salt: None,
            raw_hwid_fingerprint: None,
            used_at: None,
            created_at: self.clock.now_utc(),
        };
        self.tokens.insert(&token).await?;

        info!(token_id = %token.id, person = %token.person_name, "Patch token created");
        self.audit
            .record(
                NewActivityLog::new(
                    AuditAction::CreatePatch,
                    format!(
                        "Patch for {} ({} users, {} days)",
                        token.person_name, token.max_users, token.duration_days
                    ),
                )
                .server(token.server_id),
            )
            .await?;
        Ok(token)
    }

    pub async fn list(&self) -> Result<Vec<PatchToken>> {
        self.tokens.list().await
    }

    /// Activated tokens still waiting for a license.
    pub async fn available(&self) -> Result<Vec<PatchToken>> {
        Ok(self
            .tokens
            .list()
            .await?
            .into_iter()
            .filter(PatchToken::is_awaiting_license)
            .collect())
    }

    /// Script served to the target. Unknown or spent tokens get a script that fails.
    pub async fn run_script(&self, token: &str) -> Result<String> {
        Ok(match self.tokens.get_by_token(token).await? {
            Some(t) if t.status == PatchStatus::Pending => self.scripts.patch_run_script(&t.token),
            Some(t) => ScriptRenderer::patch_error_script(&format!(
                "this patch token is {}",
                t.status.as_str()
            )),
            None => ScriptRenderer::patch_error_script("unknown patch token"),
        })
    }

    /// Record the reporting host against a pending token. No license is issued here.
    pub async fn activate(
        &self,
        token: &str,
        raw_hwid: &str,
        hostname: Option<&str>,
        ip: Option<&str>,
    ) -> Result<PatchToken> {
        let mut patch = self
            .tokens
            .get_by_token(token)
            .await?
            .ok_or_else(|| Error::not_found("patch token", token))?;
        if patch.status != PatchStatus::Pending {
            warn!(token_id = %patch.id, status = patch.status.as_str(), "Patch token reused");
            return Err(Error::Conflict(format!(
                "patch token is already {}",
                patch.status.as_str()
            )));
        }

        let raw = raw_hwid.trim();
        if raw.chars().all(|c| c == SEPARATOR) {
            return Err(Error::invalid("raw_hwid", "no hardware identifiers reported"));
        }

        let salt = generate_salt();
        let hwid = digest_raw(raw, &salt);
        patch.status = PatchStatus::Used;
        patch.used_at = Some(self.clock.now_utc());
        patch.raw_hwid_fingerprint = Some(raw.to_string());
        patch.hardware_id = Some(hwid.clone());
        patch.hwid_salt = Some(salt);
        patch.activated_hostname = hostname.map(str::to_string).filter(|h| !h.is_empty());
        patch.activated_ip = ip.map(str::to_string).filter(|i| !i.is_empty());
        // A concurrent activation of the same token loses here.
        self.tokens
            .update_if_status(&patch, PatchStatus::Pending)
            .await?;

        info!(
            token_id = %patch.id,
            hostname = patch.activated_hostname.as_deref().unwrap_or("-"),
            hwid = short_hwid(&hwid),
            "Patch token activated"
        );
        self.audit
            .record(
                NewActivityLog::new(
                    AuditAction::ActivatePatch,
                    format!(
                        "Host {} ({}) registered for {}, hardware {}",
                        patch.activated_hostname.as_deref().unwrap_or("unknown"),
                        patch.activated_ip.as_deref().unwrap_or("unknown"),
                        patch.person_name,
                        short_hwid(&hwid)
                    ),
                )
                .server(patch.server_id),
            )
            .await?;
        Ok(patch)
    }

    /// Soft delete. Revoking twice is a no-op.
    pub async fn revoke(&self, id: PatchTokenId) -> Result<PatchToken> {
        let mut patch = self
            .tokens
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("patch token", id.to_string()))?;
        if patch.status == PatchStatus::Revoked {
            return Ok(patch);
        }
        let seen = patch.status;
        patch.status = PatchStatus::Revoked;
        self.tokens.update_if_status(&patch, seen).await?;

        self.audit
            .record(
                NewActivityLog::new(
                    AuditAction::RevokePatch,
                    format!("Patch for {} revoked", patch.person_name),
                )
                .server(patch.server_id),
            )
            .await?;
        Ok(patch)
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::Harness;
    use leasehold_core::Error;
    use leasehold_core::fingerprint::digest_raw;
    use leasehold_core::license::{LicenseStatus, TokenEntitlement};
    use leasehold_core::patch::{NewPatchToken, PatchStatus};

    fn new_token() -> NewPatchToken {
        NewPatchToken {
            person_name: "Dana".to_string(),
            max_users: 50,
            max_sites: 2,
            duration_days: 90,
            server_id: None,
            notes: None,
            target_ip: None,
        }
    }

    fn entitlement(name: &str) -> TokenEntitlement {
        TokenEntitlement {
            license_id: name.to_string(),
            max_users: None,
            max_sites: None,
            expires_at: None,
            client_id: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_run_script_only_for_pending_tokens() {
        let h = Harness::new();
        let token = h.patches.create_token(new_token()).await.unwrap();

        let script = h.patches.run_script(&token.token).await.unwrap();
        assert!(script.contains(&token.token));
        assert!(script.contains("/api/patch-activate"));

        let unknown = h.patches.run_script("nope").await.unwrap();
        assert!(unknown.contains("exit 1"));

        h.patches.revoke(token.id).await.unwrap();
        let revoked = h.patches.run_script(&token.token).await.unwrap();
        assert!(revoked.contains("revoked"));
    }

    #[tokio::test]
    async fn test_activate_is_single_use() {
        let h = Harness::new();
        let token = h.patches.create_token(new_token()).await.unwrap();
        let raw = "mid:uuid:52:54:00:aa:bb:cc::::disk:";

        let used = h
            .patches
            .activate(&token.token, raw, Some("host-1"), Some("10.1.1.1"))
            .await
            .unwrap();
        assert_eq!(used.status, PatchStatus::Used);
        let salt = used.hwid_salt.clone().unwrap();
        assert_eq!(used.hardware_id, Some(digest_raw(raw, &salt)));
        assert_eq!(used.activated_hostname.as_deref(), Some("host-1"));
        assert!(used.license_id.is_none());

        let again = h
            .patches
            .activate(&token.token, raw, None, None)
            .await
            .unwrap_err();
        assert!(matches!(again, Error::Conflict(_)));
        assert_eq!(h.patches.available().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_activations_register_one_host() {
        let h = Harness::interleaved();
        let token = h.patches.create_token(new_token()).await.unwrap();

        let (first, second) = tokio::join!(
            h.patches.activate(&token.token, "host-a:uuid-a", Some("host-a"), None),
            h.patches.activate(&token.token, "host-b:uuid-b", Some("host-b"), None),
        );
        let first = first.unwrap();
        assert!(matches!(second, Err(Error::Conflict(_))));

        let stored = h.patches.list().await.unwrap().remove(0);
        assert_eq!(stored.activated_hostname.as_deref(), Some("host-a"));
        assert_eq!(stored.hardware_id, first.hardware_id);
        assert_eq!(stored.hwid_salt, first.hwid_salt);
    }

    #[tokio::test]
    async fn test_activate_rejects_empty_fingerprint() {
        let h = Harness::new();
        let token = h.patches.create_token(new_token()).await.unwrap();
        let err = h
            .patches
            .activate(&token.token, "::::::", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = h
            .patches
            .activate("missing", "abc", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_license_from_token() {
        let h = Harness::new();
        let token = h.patches.create_token(new_token()).await.unwrap();

        // pending tokens cannot issue licenses yet
        let err = h
            .licenses
            .create_from_token(token.id, entitlement("LIC-P"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let used = h
            .patches
            .activate(&token.token, "mid:uuid", Some("host-1"), None)
            .await
            .unwrap();
        let license = h
            .licenses
            .create_from_token(token.id, entitlement("LIC-P"))
            .await
            .unwrap();
        assert_eq!(license.status, LicenseStatus::Active);
        assert_eq!(license.hardware_id, used.hardware_id);
        assert_eq!(Some(license.hwid_salt.clone()), used.hwid_salt);
        assert_eq!(license.max_users, 50);
        assert_eq!(
            (license.expires_at - license.created_at).num_days(),
            90
        );
        assert!(h.patches.available().await.unwrap().is_empty());

        let err = h
            .licenses
            .create_from_token(token.id, entitlement("LIC-Q"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_token_issues_one_license_under_concurrency() {
        let h = Harness::interleaved();
        let token = h.patches.create_token(new_token()).await.unwrap();
        h.patches
            .activate(&token.token, "mid:uuid", Some("host-1"), None)
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            h.licenses.create_from_token(token.id, entitlement("LIC-A")),
            h.licenses.create_from_token(token.id, entitlement("LIC-B")),
        );
        let issued = first.unwrap();
        assert!(matches!(second, Err(Error::Conflict(_))));

        let licenses = h.licenses.list().await.unwrap();
        assert_eq!(licenses.len(), 1);
        assert_eq!(licenses[0].id, issued.id);
        let stored = h.patches.list().await.unwrap().remove(0);
        assert_eq!(stored.license_id, Some(issued.id));
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let h = Harness::new();
        let token = h.patches.create_token(new_token()).await.unwrap();
        assert_eq!(h.patches.revoke(token.id).await.unwrap().status, PatchStatus::Revoked);
        assert_eq!(h.patches.revoke(token.id).await.unwrap().status, PatchStatus::Revoked);
        assert_eq!(h.patches.list().await.unwrap().len(), 1);
    }
}
