//! PostgreSQL implementation of ServerRepository.

use async_trait::async_trait;
use leasehold_core::ids::ServerId;
use leasehold_core::ports::ServerRepository;
use leasehold_core::server::Server;
use leasehold_core::{Error, Result};
use sqlx::{PgPool, Row};

const COLUMNS: &str =
    "id, name, host, port, username, password, is_connected, last_checked, hardware_id, created_at";

pub struct PgServerRepository {
    pool: PgPool,
}

impl PgServerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_server(r: &sqlx::postgres::PgRow) -> Result<Server> {
        let port: i32 = r.get("port");
        Ok(Server {
            id: ServerId::from_uuid(r.get("id")),
            name: r.get("name"),
            host: r.get("host"),
            port: u16::try_from(port)
                .map_err(|_| Error::Database(format!("server port out of range: {port}")))?,
            username: r.get("username"),
            password: r.get("password"),
            is_connected: r.get("is_connected"),
            last_checked: r.get("last_checked"),
            hardware_id: r.get("hardware_id"),
            created_at: r.get("created_at"),
        })
    }
}

#[async_trait]
impl ServerRepository for PgServerRepository {
    async fn insert(&self, server: &Server) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO servers ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(server.id.as_uuid())
        .bind(&server.name)
        .bind(&server.host)
        .bind(i32::from(server.port))
        .bind(&server.username)
        .bind(&server.password)
        .bind(server.is_connected)
        .bind(server.last_checked)
        .bind(&server.hardware_id)
        .bind(server.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, id: ServerId) -> Result<Option<Server>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM servers WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        row.as_ref().map(Self::row_to_server).transpose()
    }

    async fn list(&self) -> Result<Vec<Server>> {
        let rows = sqlx::query(&format!("SELECT {COLUMNS} FROM servers ORDER BY created_at DESC"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.iter().map(Self::row_to_server).collect()
    }

    async fn update(&self, server: &Server) -> Result<()> {
        let result = sqlx::query("UPDATE servers SET name = $2, host = $3, port = $4, username = $5, password = $6, is_connected = $7, last_checked = $8, hardware_id = $9 WHERE id = $1")
            .bind(server.id.as_uuid())
            .bind(&server.name)
            .bind(&server.host)
            .bind(i32::from(server.port))
            .bind(&server.username)
            .bind(&server.password)
            .bind(server.is_connected)
            .bind(server.last_checked)
            .bind(&server.hardware_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("server", server.id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, id: ServerId) -> Result<()> {
        // licenses.server_id is ON DELETE SET NULL
        sqlx::query("DELETE FROM servers WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}
