//! PostgreSQL implementation of PatchTokenRepository.

use super::license::insert_license;
use crate::map_db_error;
use async_trait::async_trait;
use leasehold_core::ids::{LicenseRecordId, PatchTokenId, ServerId};
use leasehold_core::patch::{PatchStatus, PatchToken};
use leasehold_core::license::License;
use leasehold_core::ports::PatchTokenRepository;
use leasehold_core::{Error, Result};
use sqlx::{PgPool, Row};

const COLUMNS: &str = "id, token, person_name, max_users, max_sites, duration_days, status, license_id, server_id, notes, target_ip, activated_hostname, activated_ip, hardware_id, hwid_salt, raw_hwid_fingerprint, used_at, created_at";

pub struct PgPatchTokenRepository {
    pool: PgPool,
}

impl PgPatchTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_token(r: &sqlx::postgres::PgRow) -> Result<PatchToken> {
        let status: String = r.get("status");
        Ok(PatchToken {
            id: PatchTokenId::from_uuid(r.get("id")),
            token: r.get("token"),
            person_name: r.get("person_name"),
            max_users: r.get("max_users"),
            max_sites: r.get("max_sites"),
            duration_days: r.get("duration_days"),
            status: PatchStatus::parse(&status)
                .ok_or_else(|| Error::Database(format!("unknown patch status '{status}'")))?,
            license_id: r
                .get::<Option<uuid::Uuid>, _>("license_id")
                .map(LicenseRecordId::from_uuid),
            server_id: r
                .get::<Option<uuid::Uuid>, _>("server_id")
                .map(ServerId::from_uuid),
            notes: r.get("notes"),
            target_ip: r.get("target_ip"),
            activated_hostname: r.get("activated_hostname"),
            activated_ip: r.get("activated_ip"),
            hardware_id: r.get("hardware_id"),
            hwid_salt: r.get("hwid_salt"),
            raw_hwid_fingerprint: r.get("raw_hwid_fingerprint"),
            used_at: r.get("used_at"),
            created_at: r.get("created_at"),
        })
    }

    /// Full-row update, optionally guarded on the stored status. Returns rows affected.
    async fn update_where(&self, token: &PatchToken, expected: Option<PatchStatus>) -> Result<u64> {
        let guard = if expected.is_some() { " AND status = $12" } else { "" };
        let sql = format!("UPDATE patch_tokens SET status = $2, license_id = $3, server_id = $4, notes = $5, activated_hostname = $6, activated_ip = $7, hardware_id = $8, hwid_salt = $9, raw_hwid_fingerprint = $10, used_at = $11 WHERE id = $1{guard}");
        let mut query = sqlx::query(&sql)
            .bind(token.id.as_uuid())
            .bind(token.status.as_str())
            .bind(token.license_id.map(|id| *id.as_uuid()))
            .bind(token.server_id.map(|id| *id.as_uuid()))
            .bind(&token.notes)
            .bind(&token.activated_hostname)
            .bind(&token.activated_ip)
            .bind(&token.hardware_id)
            .bind(&token.hwid_salt)
            .bind(&token.raw_hwid_fingerprint)
            .bind(token.used_at);
        if let Some(status) = expected {
            query = query.bind(status.as_str());
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }

    /// Explain why a guarded write on `id` matched nothing.
    async fn refused(&self, id: PatchTokenId) -> Error {
        match self.get(id).await {
            Ok(Some(current)) if current.license_id.is_some() => {
                Error::Conflict("patch token is already licensed".to_string())
            }
            Ok(Some(current)) => Error::Conflict(format!(
                "patch token is already {}",
                current.status.as_str()
            )),
            Ok(None) => Error::not_found("patch token", id.to_string()),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl PatchTokenRepository for PgPatchTokenRepository {
    async fn insert(&self, token: &PatchToken) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO patch_tokens ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)"
        ))
        .bind(token.id.as_uuid())
        .bind(&token.token)
        .bind(&token.person_name)
        .bind(token.max_users)
        .bind(token.max_sites)
        .bind(token.duration_days)
        .bind(token.status.as_str())
        .bind(token.license_id.map(|id| *id.as_uuid()))
        .bind(token.server_id.map(|id| *id.as_uuid()))
        .bind(&token.notes)
        .bind(&token.target_ip)
        .bind(&token.activated_hostname)
        .bind(&token.activated_ip)
        .bind(&token.hardware_id)
        .bind(&token.hwid_salt)
        .bind(&token.raw_hwid_fingerprint)
        .bind(token.used_at)
        .bind(token.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_error(e, |_| "patch token already exists".to_string()))?;
        Ok(())
    }

    async fn get(&self, id: PatchTokenId) -> Result<Option<PatchToken>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM patch_tokens WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        row.as_ref().map(Self::row_to_token).transpose()
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<PatchToken>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM patch_tokens WHERE token = $1"))
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        row.as_ref().map(Self::row_to_token).transpose()
    }

    async fn list(&self) -> Result<Vec<PatchToken>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM patch_tokens ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        rows.iter().map(Self::row_to_token).collect()
    }

    async fn update(&self, token: &PatchToken) -> Result<()> {
        if self.update_where(token, None).await? == 0 {
            return Err(Error::not_found("patch token", token.id.to_string()));
        }
        Ok(())
    }

    async fn update_if_status(&self, token: &PatchToken, expected: PatchStatus) -> Result<()> {
        if self.update_where(token, Some(expected)).await? == 0 {
            return Err(self.refused(token.id).await);
        }
        Ok(())
    }

    async fn issue_license(&self, token_id: PatchTokenId, license: &License) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        insert_license(&mut *tx, license).await?;
        let linked = sqlx::query(
            "UPDATE patch_tokens SET license_id = $2 \
             WHERE id = $1 AND status = 'used' AND license_id IS NULL",
        )
        .bind(token_id.as_uuid())
        .bind(license.id.as_uuid())
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        if linked.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| Error::Database(e.to_string()))?;
            return Err(self.refused(token_id).await);
        }
        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}
