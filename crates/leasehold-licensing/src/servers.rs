//! Deployment target registry.

use crate::audit::AuditTrail;
use crate::repos::Repositories;
use leasehold_core::activity::{AuditAction, NewActivityLog};
use leasehold_core::clock::Clock;
use leasehold_core::fingerprint::short_hwid;
use leasehold_core::ids::ServerId;
use leasehold_core::ports::{Deployer, ProbeResult};
use leasehold_core::server::{NewServer, Server, ServerUpdate};
use leasehold_core::validation::Validate;
use leasehold_core::{Error, Result};
use std::sync::Arc;
use tracing::info;

pub struct ServerService {
    repos: Repositories,
    deployer: Arc<dyn Deployer>,
    audit: AuditTrail,
    clock: Arc<dyn Clock>,
}

impl ServerService {
    pub fn new(repos: Repositories, deployer: Arc<dyn Deployer>, clock: Arc<dyn Clock>) -> Self {
        Self {
            audit: AuditTrail::new(repos.activity.clone(), clock.clone()),
            repos,
            deployer,
            clock,
        }
    }

    pub async fn create(&self, input: NewServer) -> Result<Server> {
        input.validate()?;
        let server = Server {
            id: ServerId::new(),
            name: input.name,
            host: input.host,
            port: input.port,
            username: input.username,
            password: input.password,
            is_connected: false,
            last_checked: None,
            hardware_id: None,
            created_at: self.clock.now_utc(),
        };
        self.repos.servers.insert(&server).await?;

        info!(server = %server.name, host = %server.host, "Server registered");
        self.audit
            .record(
                NewActivityLog::new(
                    AuditAction::CreateServer,
                    format!("Server {} ({}:{}) added", server.name, server.host, server.port),
                )
                .server(Some(server.id)),
            )
            .await?;
        Ok(server)
    }

    pub async fn get(&self, id: ServerId) -> Result<Server> {
        self.repos
            .servers
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("server", id.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<Server>> {
        self.repos.servers.list().await
    }

    pub async fn update(&self, id: ServerId, update: ServerUpdate) -> Result<Server> {
        update.validate()?;
        let mut server = self.get(id).await?;
        update.apply(&mut server);
        self.repos.servers.update(&server).await?;

        self.audit
            .record(
                NewActivityLog::new(AuditAction::UpdateServer, format!("Server {} updated", server.name))
                    .server(Some(server.id)),
            )
            .await?;
        Ok(server)
    }

    /// Remove a server. Licenses referencing it are detached, not deleted.
    pub async fn delete(&self, id: ServerId) -> Result<()> {
        let server = self.get(id).await?;
        self.repos.servers.delete(id).await?;

        info!(server = %server.name, "Server deleted");
        self.audit
            .record(NewActivityLog::new(
                AuditAction::DeleteServer,
                format!("Server {} ({}) deleted", server.name, server.host),
            ))
            .await?;
        Ok(())
    }

    /// Probe the server and record reachability plus its raw fingerprint.
    pub async fn test_connection(&self, id: ServerId) -> Result<ProbeResult> {
        let mut server = self.get(id).await?;
        let probe = self.deployer.probe(&server).await;

        server.is_connected = probe.connected;
        server.last_checked = Some(self.clock.now_utc());
        if let Some(raw) = &probe.hardware_id {
            server.hardware_id = Some(raw.clone());
        }
        self.repos.servers.update(&server).await?;

        let details = match (&probe.error, &server.hardware_id) {
            (Some(e), _) => format!("Connection failed: {e}"),
            (None, Some(raw)) => format!("Connected, fingerprint {}", short_hwid(raw)),
            (None, None) => "Connected, no fingerprint".to_string(),
        };
        self.audit
            .record(NewActivityLog::new(AuditAction::TestConnection, details).server(Some(id)))
            .await?;
        Ok(probe)
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::Harness;
    use leasehold_core::Error;
    use leasehold_core::server::{PASSWORD_MASK, ServerUpdate};

    #[tokio::test]
    async fn test_connection_records_fingerprint() {
        let h = Harness::new();
        let server = h.server("edge-1").await;
        h.set_target_machine("machine-a");

        let probe = h.servers.test_connection(server.id).await.unwrap();
        assert!(probe.connected);
        let stored = h.servers.get(server.id).await.unwrap();
        assert!(stored.is_connected);
        assert!(stored.last_checked.is_some());
        assert_eq!(stored.hardware_id, probe.hardware_id);
        assert!(stored.hardware_id.unwrap().starts_with("machine-a:"));
    }

    #[tokio::test]
    async fn test_unreachable_server_keeps_last_fingerprint() {
        let h = Harness::new();
        let server = h.probed_server("edge-1", "machine-a").await;
        h.executor.set_unreachable(true);

        let probe = h.servers.test_connection(server.id).await.unwrap();
        assert!(!probe.connected);
        assert!(probe.error.is_some());
        let stored = h.servers.get(server.id).await.unwrap();
        assert!(!stored.is_connected);
        assert_eq!(stored.hardware_id, server.hardware_id);
    }

    #[tokio::test]
    async fn test_update_keeps_masked_password() {
        let h = Harness::new();
        let server = h.server("edge-1").await;
        let updated = h
            .servers
            .update(
                server.id,
                ServerUpdate {
                    name: Some("edge-renamed".to_string()),
                    password: Some(PASSWORD_MASK.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "edge-renamed");
        assert_eq!(updated.password, server.password);
    }

    #[tokio::test]
    async fn test_delete_detaches_license() {
        let h = Harness::new();
        let server = h.probed_server("edge-1", "machine-a").await;
        let license = h.create_license("LIC-1", Some(server.id)).await;

        h.servers.delete(server.id).await.unwrap();
        assert!(matches!(
            h.servers.get(server.id).await.unwrap_err(),
            Error::NotFound { .. }
        ));
        let stored = h.licenses.get(license.id).await.unwrap();
        assert!(stored.server_id.is_none());
    }
}
