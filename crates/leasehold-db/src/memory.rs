//! In-memory store implementing every repository port.
//!
//! Backs `--memory` dev mode and the test suites. Uniqueness rules are checked
//! and applied under a single lock, matching the PostgreSQL constraints.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leasehold_core::activity::ActivityLog;
use leasehold_core::ids::{LicenseRecordId, PatchTokenId, ServerId};
use leasehold_core::license::{License, LicenseStatus};
use leasehold_core::patch::{PatchStatus, PatchToken};
use leasehold_core::ports::{
    ActivityLogRepository, LicenseRepository, PatchTokenRepository, ServerRepository,
};
use leasehold_core::server::Server;
use leasehold_core::{Error, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Tables {
    licenses: HashMap<LicenseRecordId, License>,
    servers: HashMap<ServerId, Server>,
    patch_tokens: HashMap<PatchTokenId, PatchToken>,
    activity: Vec<ActivityLog>,
}

impl Tables {
    /// Reject `candidate` if it would break a license uniqueness rule.
    fn check_license_unique(&self, candidate: &License) -> Result<()> {
        for other in self.licenses.values().filter(|l| l.id != candidate.id) {
            if other.license_id == candidate.license_id {
                return Err(Error::Conflict(format!(
                    "license '{}' already exists",
                    candidate.license_id
                )));
            }
            if candidate.server_id.is_some() && other.server_id == candidate.server_id {
                return Err(Error::Conflict(
                    "server already hosts another license".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| Error::Internal("memory store lock poisoned".to_string()))
    }
}

fn newest_first<T>(mut items: Vec<T>, created_at: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    items.sort_by_key(|item| std::cmp::Reverse(created_at(item)));
    items
}

#[async_trait]
impl LicenseRepository for MemoryStore {
    async fn insert(&self, license: &License) -> Result<()> {
        let mut tables = self.lock()?;
        if tables.licenses.contains_key(&license.id) {
            return Err(Error::Conflict(format!("license row {} exists", license.id)));
        }
        tables.check_license_unique(license)?;
        tables.licenses.insert(license.id, license.clone());
        Ok(())
    }

    async fn get(&self, id: LicenseRecordId) -> Result<Option<License>> {
        Ok(self.lock()?.licenses.get(&id).cloned())
    }

    async fn get_by_license_id(&self, license_id: &str) -> Result<Option<License>> {
        Ok(self
            .lock()?
            .licenses
            .values()
            .find(|l| l.license_id == license_id)
            .cloned())
    }

    async fn get_by_server(&self, server_id: ServerId) -> Result<Option<License>> {
        Ok(self
            .lock()?
            .licenses
            .values()
            .find(|l| l.server_id == Some(server_id))
            .cloned())
    }

    async fn list(&self) -> Result<Vec<License>> {
        let all = self.lock()?.licenses.values().cloned().collect();
        Ok(newest_first(all, |l: &License| l.created_at))
    }

    async fn list_by_status(&self, status: LicenseStatus) -> Result<Vec<License>> {
        let matching = self
            .lock()?
            .licenses
            .values()
            .filter(|l| l.status == status)
            .cloned()
            .collect();
        Ok(newest_first(matching, |l: &License| l.created_at))
    }

    async fn update(&self, license: &License) -> Result<()> {
        let mut tables = self.lock()?;
        if !tables.licenses.contains_key(&license.id) {
            return Err(Error::not_found("license", license.id.to_string()));
        }
        tables.check_license_unique(license)?;
        tables.licenses.insert(license.id, license.clone());
        Ok(())
    }

    async fn bind_hardware(&self, license: &License) -> Result<bool> {
        let mut tables = self.lock()?;
        match tables.licenses.get(&license.id) {
            None => return Err(Error::not_found("license", license.id.to_string())),
            Some(stored) if stored.hardware_id.is_some() => return Ok(false),
            Some(_) => {}
        }
        tables.check_license_unique(license)?;
        tables.licenses.insert(license.id, license.clone());
        Ok(true)
    }

    async fn suspend_if_silent(
        &self,
        id: LicenseRecordId,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.lock()?;
        let Some(license) = tables.licenses.get_mut(&id) else {
            return Ok(false);
        };
        if license.status != LicenseStatus::Active
            || !license.last_verified_at.is_some_and(|at| at < cutoff)
        {
            return Ok(false);
        }
        license.status = LicenseStatus::Suspended;
        license.updated_at = now;
        Ok(true)
    }
}

#[async_trait]
impl ServerRepository for MemoryStore {
    async fn insert(&self, server: &Server) -> Result<()> {
        self.lock()?.servers.insert(server.id, server.clone());
        Ok(())
    }

    async fn get(&self, id: ServerId) -> Result<Option<Server>> {
        Ok(self.lock()?.servers.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Server>> {
        let all = self.lock()?.servers.values().cloned().collect();
        Ok(newest_first(all, |s: &Server| s.created_at))
    }

    async fn update(&self, server: &Server) -> Result<()> {
        let mut tables = self.lock()?;
        match tables.servers.get_mut(&server.id) {
            Some(existing) => {
                *existing = server.clone();
                Ok(())
            }
            None => Err(Error::not_found("server", server.id.to_string())),
        }
    }

    async fn delete(&self, id: ServerId) -> Result<()> {
        let mut tables = self.lock()?;
        tables.servers.remove(&id);
        for license in tables.licenses.values_mut() {
            if license.server_id == Some(id) {
                license.server_id = None;
            }
        }
        for token in tables.patch_tokens.values_mut() {
            if token.server_id == Some(id) {
                token.server_id = None;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PatchTokenRepository for MemoryStore {
    async fn insert(&self, token: &PatchToken) -> Result<()> {
        let mut tables = self.lock()?;
        if tables.patch_tokens.values().any(|t| t.token == token.token) {
            return Err(Error::Conflict("patch token already exists".to_string()));
        }
        tables.patch_tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn get(&self, id: PatchTokenId) -> Result<Option<PatchToken>> {
        Ok(self.lock()?.patch_tokens.get(&id).cloned())
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<PatchToken>> {
        Ok(self
            .lock()?
            .patch_tokens
            .values()
            .find(|t| t.token == token)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<PatchToken>> {
        let all = self.lock()?.patch_tokens.values().cloned().collect();
        Ok(newest_first(all, |t: &PatchToken| t.created_at))
    }

    async fn update(&self, token: &PatchToken) -> Result<()> {
        let mut tables = self.lock()?;
        match tables.patch_tokens.get_mut(&token.id) {
            Some(existing) => {
                *existing = token.clone();
                Ok(())
            }
            None => Err(Error::not_found("patch token", token.id.to_string())),
        }
    }

    async fn update_if_status(&self, token: &PatchToken, expected: PatchStatus) -> Result<()> {
        let mut tables = self.lock()?;
        let existing = tables
            .patch_tokens
            .get_mut(&token.id)
            .ok_or_else(|| Error::not_found("patch token", token.id.to_string()))?;
        if existing.status != expected {
            return Err(Error::Conflict(format!(
                "patch token is already {}",
                existing.status.as_str()
            )));
        }
        *existing = token.clone();
        Ok(())
    }

    async fn issue_license(&self, token_id: PatchTokenId, license: &License) -> Result<()> {
        let mut tables = self.lock()?;
        let token = tables
            .patch_tokens
            .get(&token_id)
            .ok_or_else(|| Error::not_found("patch token", token_id.to_string()))?;
        if token.license_id.is_some() {
            return Err(Error::Conflict("patch token is already licensed".to_string()));
        }
        if !token.is_awaiting_license() {
            return Err(Error::Conflict(format!(
                "patch token is already {}",
                token.status.as_str()
            )));
        }
        if tables.licenses.contains_key(&license.id) {
            return Err(Error::Conflict(format!("license row {} exists", license.id)));
        }
        tables.check_license_unique(license)?;
        tables.licenses.insert(license.id, license.clone());
        if let Some(token) = tables.patch_tokens.get_mut(&token_id) {
            token.license_id = Some(license.id);
        }
        Ok(())
    }
}

#[async_trait]
impl ActivityLogRepository for MemoryStore {
    async fn append(&self, entry: &ActivityLog) -> Result<()> {
        self.lock()?.activity.push(entry.clone());
        Ok(())
    }

    async fn recent(&self, limit: u32) -> Result<Vec<ActivityLog>> {
        Ok(self
            .lock()?
            .activity
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn for_license(
        &self,
        license_id: LicenseRecordId,
        limit: u32,
    ) -> Result<Vec<ActivityLog>> {
        Ok(self
            .lock()?
            .activity
            .iter()
            .rev()
            .filter(|e| e.license_id == Some(license_id))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use leasehold_core::activity::{AuditAction, NewActivityLog};

    fn license(name: &str, server_id: Option<ServerId>) -> License {
        let now = Utc::now();
        License {
            id: LicenseRecordId::new(),
            license_id: name.to_string(),
            server_id,
            hardware_id: None,
            hwid_salt: "ab".repeat(16),
            status: LicenseStatus::Inactive,
            expires_at: now + Duration::days(30),
            max_users: 100,
            max_sites: 1,
            client_id: None,
            notes: None,
            signature: None,
            last_verified_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_license_id_is_unique() {
        let store = MemoryStore::new();
        LicenseRepository::insert(&store, &license("LIC-1", None))
            .await
            .unwrap();
        let err = LicenseRepository::insert(&store, &license("LIC-1", None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_one_license_per_server() {
        let store = MemoryStore::new();
        let server = ServerId::new();
        LicenseRepository::insert(&store, &license("LIC-1", Some(server)))
            .await
            .unwrap();

        let mut other = license("LIC-2", None);
        LicenseRepository::insert(&store, &other).await.unwrap();

        other.server_id = Some(server);
        let err = LicenseRepository::update(&store, &other).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let stored = LicenseRepository::get(&store, other.id).await.unwrap().unwrap();
        assert_eq!(stored.server_id, None);
    }

    #[tokio::test]
    async fn test_delete_server_detaches_license() {
        let store = MemoryStore::new();
        let server = ServerId::new();
        let lic = license("LIC-1", Some(server));
        LicenseRepository::insert(&store, &lic).await.unwrap();

        ServerRepository::delete(&store, server).await.unwrap();

        let stored = LicenseRepository::get(&store, lic.id).await.unwrap().unwrap();
        assert_eq!(stored.server_id, None);
    }

    #[tokio::test]
    async fn test_bind_hardware_only_once() {
        let store = MemoryStore::new();
        let mut first = license("LIC-1", None);
        LicenseRepository::insert(&store, &first).await.unwrap();
        let mut second = first.clone();

        first.hardware_id = Some("a".repeat(64));
        second.hardware_id = Some("b".repeat(64));
        assert!(store.bind_hardware(&first).await.unwrap());
        assert!(!store.bind_hardware(&second).await.unwrap());

        let stored = LicenseRepository::get(&store, first.id).await.unwrap().unwrap();
        assert_eq!(stored.hardware_id, Some("a".repeat(64)));
    }

    #[tokio::test]
    async fn test_suspend_if_silent_respects_fresh_verification() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut lic = license("LIC-1", None);
        lic.status = LicenseStatus::Active;
        lic.last_verified_at = Some(now - Duration::hours(13));
        LicenseRepository::insert(&store, &lic).await.unwrap();

        // a verify lands before the sweep writes
        let mut verified = lic.clone();
        verified.last_verified_at = Some(now);
        LicenseRepository::update(&store, &verified).await.unwrap();

        let cutoff = now - Duration::hours(12);
        assert!(!store.suspend_if_silent(lic.id, cutoff, now).await.unwrap());
        let stored = LicenseRepository::get(&store, lic.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LicenseStatus::Active);
        assert_eq!(stored.last_verified_at, Some(now));

        assert!(
            store
                .suspend_if_silent(lic.id, now + Duration::seconds(1), now)
                .await
                .unwrap()
        );
    }

    fn used_token(now: DateTime<Utc>) -> PatchToken {
        PatchToken {
            id: PatchTokenId::new(),
            token: "tok".to_string(),
            person_name: "Robin".to_string(),
            max_users: 5,
            max_sites: 1,
            duration_days: 30,
            status: PatchStatus::Used,
            license_id: None,
            server_id: None,
            notes: None,
            target_ip: None,
            activated_hostname: None,
            activated_ip: None,
            hardware_id: Some("c".repeat(64)),
            hwid_salt: Some("ab".repeat(16)),
            raw_hwid_fingerprint: None,
            used_at: Some(now),
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_update_if_status_rejects_moved_token() {
        let store = MemoryStore::new();
        let mut token = used_token(Utc::now());
        token.status = PatchStatus::Pending;
        PatchTokenRepository::insert(&store, &token).await.unwrap();

        let mut activated = token.clone();
        activated.status = PatchStatus::Used;
        store
            .update_if_status(&activated, PatchStatus::Pending)
            .await
            .unwrap();
        let err = store
            .update_if_status(&activated, PatchStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_issue_license_links_token_once() {
        let store = MemoryStore::new();
        let token = used_token(Utc::now());
        PatchTokenRepository::insert(&store, &token).await.unwrap();

        let first = license("LIC-1", None);
        store.issue_license(token.id, &first).await.unwrap();
        let err = store
            .issue_license(token.id, &license("LIC-2", None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let stored = PatchTokenRepository::get(&store, token.id).await.unwrap().unwrap();
        assert_eq!(stored.license_id, Some(first.id));
        assert!(store.get_by_license_id("LIC-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_activity_newest_first() {
        let store = MemoryStore::new();
        let lic = LicenseRecordId::new();
        let now = Utc::now();
        store
            .append(&NewActivityLog::new(AuditAction::CreateLicense, "one").license(lic).at(now))
            .await
            .unwrap();
        store
            .append(&NewActivityLog::new(AuditAction::CreateServer, "two").at(now))
            .await
            .unwrap();
        store
            .append(&NewActivityLog::new(AuditAction::ExtendLicense, "three").license(lic).at(now))
            .await
            .unwrap();

        let recent = store.recent(2).await.unwrap();
        assert_eq!(recent[0].details, "three");
        assert_eq!(recent.len(), 2);

        let for_license = store.for_license(lic, 100).await.unwrap();
        let details: Vec<_> = for_license.iter().map(|e| e.details.as_str()).collect();
        assert_eq!(details, vec!["three", "one"]);
    }
}
