//! PostgreSQL implementation of ActivityLogRepository.

use async_trait::async_trait;
use leasehold_core::activity::{ActivityLog, AuditAction};
use leasehold_core::ids::{ActivityLogId, LicenseRecordId, ServerId};
use leasehold_core::ports::ActivityLogRepository;
use leasehold_core::{Error, Result};
use sqlx::{PgPool, Row};

pub struct PgActivityLogRepository {
    pool: PgPool,
}

impl PgActivityLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_log(r: &sqlx::postgres::PgRow) -> Result<ActivityLog> {
        let action: String = r.get("action");
        Ok(ActivityLog {
            id: ActivityLogId::from_uuid(r.get("id")),
            license_id: r
                .get::<Option<uuid::Uuid>, _>("license_id")
                .map(LicenseRecordId::from_uuid),
            server_id: r
                .get::<Option<uuid::Uuid>, _>("server_id")
                .map(ServerId::from_uuid),
            action: AuditAction::parse(&action)
                .ok_or_else(|| Error::Database(format!("unknown audit action '{action}'")))?,
            details: r.get("details"),
            created_at: r.get("created_at"),
        })
    }
}

#[async_trait]
impl ActivityLogRepository for PgActivityLogRepository {
    async fn append(&self, entry: &ActivityLog) -> Result<()> {
        sqlx::query("INSERT INTO activity_logs (id, license_id, server_id, action, details, created_at) VALUES ($1, $2, $3, $4, $5, $6)")
            .bind(entry.id.as_uuid())
            .bind(entry.license_id.map(|id| *id.as_uuid()))
            .bind(entry.server_id.map(|id| *id.as_uuid()))
            .bind(entry.action.as_str())
            .bind(&entry.details)
            .bind(entry.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn recent(&self, limit: u32) -> Result<Vec<ActivityLog>> {
        let rows = sqlx::query("SELECT id, license_id, server_id, action, details, created_at FROM activity_logs ORDER BY created_at DESC LIMIT $1")
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.iter().map(Self::row_to_log).collect()
    }

    async fn for_license(
        &self,
        license_id: LicenseRecordId,
        limit: u32,
    ) -> Result<Vec<ActivityLog>> {
        let rows = sqlx::query("SELECT id, license_id, server_id, action, details, created_at FROM activity_logs WHERE license_id = $1 ORDER BY created_at DESC LIMIT $2")
            .bind(license_id.as_uuid())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.iter().map(Self::row_to_log).collect()
    }
}
