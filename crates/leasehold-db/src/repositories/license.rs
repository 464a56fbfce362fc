//! PostgreSQL implementation of LicenseRepository.

use crate::map_db_error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leasehold_core::ids::{LicenseRecordId, ServerId};
use leasehold_core::license::{License, LicenseStatus};
use leasehold_core::ports::LicenseRepository;
use leasehold_core::{Error, Result};
use sqlx::{PgExecutor, PgPool, Row};

const COLUMNS: &str = "id, license_id, server_id, hardware_id, hwid_salt, status, expires_at, max_users, max_sites, client_id, notes, signature, last_verified_at, created_at, updated_at";

pub struct PgLicenseRepository {
    pool: PgPool,
}

impl PgLicenseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_license(r: &sqlx::postgres::PgRow) -> Result<License> {
        let status: String = r.get("status");
        Ok(License {
            id: LicenseRecordId::from_uuid(r.get("id")),
            license_id: r.get("license_id"),
            server_id: r
                .get::<Option<uuid::Uuid>, _>("server_id")
                .map(ServerId::from_uuid),
            hardware_id: r.get("hardware_id"),
            hwid_salt: r.get("hwid_salt"),
            status: status.parse().map_err(|e| Error::Database(format!("{e}")))?,
            expires_at: r.get("expires_at"),
            max_users: r.get("max_users"),
            max_sites: r.get("max_sites"),
            client_id: r.get("client_id"),
            notes: r.get("notes"),
            signature: r.get("signature"),
            last_verified_at: r.get("last_verified_at"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        })
    }

    /// Full-row update; `guard` is ANDed onto the id match. Returns rows affected.
    async fn update_where(&self, license: &License, guard: &str) -> Result<u64> {
        let result = sqlx::query(&format!("UPDATE licenses SET license_id = $2, server_id = $3, hardware_id = $4, hwid_salt = $5, status = $6, expires_at = $7, max_users = $8, max_sites = $9, client_id = $10, notes = $11, signature = $12, last_verified_at = $13, updated_at = $14 WHERE id = $1{guard}"))
            .bind(license.id.as_uuid())
            .bind(&license.license_id)
            .bind(license.server_id.map(|id| *id.as_uuid()))
            .bind(&license.hardware_id)
            .bind(&license.hwid_salt)
            .bind(license.status.as_str())
            .bind(license.expires_at)
            .bind(license.max_users)
            .bind(license.max_sites)
            .bind(&license.client_id)
            .bind(&license.notes)
            .bind(&license.signature)
            .bind(license.last_verified_at)
            .bind(license.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_error(e, conflict(license)))?;
        Ok(result.rows_affected())
    }

    async fn fetch_one_where(&self, clause: &str, bind: uuid::Uuid) -> Result<Option<License>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM licenses WHERE {clause}"))
            .bind(bind)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        row.as_ref().map(Self::row_to_license).transpose()
    }
}

fn conflict(license: &License) -> impl FnOnce(&str) -> String + '_ {
    move |constraint: &str| {
        if constraint == "licenses_one_per_server" {
            "server already hosts another license".to_string()
        } else {
            format!("license '{}' already exists", license.license_id)
        }
    }
}

/// Insert on any executor, so patch token redemption can run it inside its transaction.
pub(crate) async fn insert_license<'e>(
    executor: impl PgExecutor<'e>,
    license: &License,
) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO licenses ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
    ))
    .bind(license.id.as_uuid())
    .bind(&license.license_id)
    .bind(license.server_id.map(|id| *id.as_uuid()))
    .bind(&license.hardware_id)
    .bind(&license.hwid_salt)
    .bind(license.status.as_str())
    .bind(license.expires_at)
    .bind(license.max_users)
    .bind(license.max_sites)
    .bind(&license.client_id)
    .bind(&license.notes)
    .bind(&license.signature)
    .bind(license.last_verified_at)
    .bind(license.created_at)
    .bind(license.updated_at)
    .execute(executor)
    .await
    .map_err(|e| map_db_error(e, conflict(license)))?;
    Ok(())
}

#[async_trait]
impl LicenseRepository for PgLicenseRepository {
    async fn insert(&self, license: &License) -> Result<()> {
        insert_license(&self.pool, license).await
    }

    async fn get(&self, id: LicenseRecordId) -> Result<Option<License>> {
        self.fetch_one_where("id = $1", *id.as_uuid()).await
    }

    async fn get_by_license_id(&self, license_id: &str) -> Result<Option<License>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM licenses WHERE license_id = $1"))
            .bind(license_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        row.as_ref().map(Self::row_to_license).transpose()
    }

    async fn get_by_server(&self, server_id: ServerId) -> Result<Option<License>> {
        self.fetch_one_where("server_id = $1", *server_id.as_uuid()).await
    }

    async fn list(&self) -> Result<Vec<License>> {
        let rows = sqlx::query(&format!("SELECT {COLUMNS} FROM licenses ORDER BY created_at DESC"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.iter().map(Self::row_to_license).collect()
    }

    async fn list_by_status(&self, status: LicenseStatus) -> Result<Vec<License>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM licenses WHERE status = $1 ORDER BY created_at DESC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        rows.iter().map(Self::row_to_license).collect()
    }

    async fn update(&self, license: &License) -> Result<()> {
        if self.update_where(license, "").await? == 0 {
            return Err(Error::not_found("license", license.id.to_string()));
        }
        Ok(())
    }

    async fn bind_hardware(&self, license: &License) -> Result<bool> {
        if self
            .update_where(license, " AND hardware_id IS NULL")
            .await?
            == 1
        {
            return Ok(true);
        }
        match self.get(license.id).await? {
            Some(_) => Ok(false),
            None => Err(Error::not_found("license", license.id.to_string())),
        }
    }

    async fn suspend_if_silent(
        &self,
        id: LicenseRecordId,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE licenses SET status = 'suspended', updated_at = $3 \
             WHERE id = $1 AND status = 'active' AND last_verified_at < $2",
        )
        .bind(id.as_uuid())
        .bind(cutoff)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(result.rows_affected() == 1)
    }
}
