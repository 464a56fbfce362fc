//! Services wired to the in-memory store, a recording executor and a mock clock.

use crate::audit::AuditTrail;
use crate::heartbeat::{HeartbeatConfig, HeartbeatMonitor};
use crate::patch::PatchService;
use crate::repos::Repositories;
use crate::servers::ServerService;
use crate::service::LicenseService;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leasehold_core::Result;
use leasehold_core::activity::AuditAction;
use leasehold_core::clock::MockClock;
use leasehold_core::codec::{DEFAULT_KEY_PREFIX, RotatingXorCodec};
use leasehold_core::fingerprint::{FingerprintSource, FingerprintSources};
use leasehold_core::ids::{LicenseRecordId, PatchTokenId, ServerId};
use leasehold_core::license::{License, LicenseStatus, NewLicense};
use leasehold_core::patch::{PatchStatus, PatchToken};
use leasehold_core::ports::{LicenseRepository, PatchTokenRepository};
use leasehold_core::server::{NewServer, Server};
use leasehold_db::memory::MemoryStore;
use leasehold_deploy::{DeploymentOrchestrator, RecordingExecutor, ScriptRenderer};
use std::sync::Arc;

pub struct Harness {
    pub clock: Arc<MockClock>,
    pub executor: Arc<RecordingExecutor>,
    pub repos: Repositories,
    pub licenses: LicenseService,
    pub servers: ServerService,
    pub patches: PatchService,
    pub heartbeat: Arc<HeartbeatMonitor>,
}

pub fn machine(name: &str) -> FingerprintSources {
    FingerprintSources::new()
        .with(FingerprintSource::MachineId, name)
        .with(FingerprintSource::ProductUuid, format!("{name}-uuid"))
        .with(FingerprintSource::PrimaryMac, "52:54:00:12:34:56")
}

/// Yields to the scheduler before every license and token call, so joined
/// futures interleave between their reads and writes.
struct Interleaving(Arc<MemoryStore>);

#[async_trait]
impl LicenseRepository for Interleaving {
    async fn insert(&self, license: &License) -> Result<()> {
        tokio::task::yield_now().await;
        LicenseRepository::insert(&*self.0, license).await
    }

    async fn get(&self, id: LicenseRecordId) -> Result<Option<License>> {
        tokio::task::yield_now().await;
        LicenseRepository::get(&*self.0, id).await
    }

    async fn get_by_license_id(&self, license_id: &str) -> Result<Option<License>> {
        tokio::task::yield_now().await;
        self.0.get_by_license_id(license_id).await
    }

    async fn get_by_server(&self, server_id: ServerId) -> Result<Option<License>> {
        tokio::task::yield_now().await;
        self.0.get_by_server(server_id).await
    }

    async fn list(&self) -> Result<Vec<License>> {
        tokio::task::yield_now().await;
        LicenseRepository::list(&*self.0).await
    }

    async fn list_by_status(&self, status: LicenseStatus) -> Result<Vec<License>> {
        tokio::task::yield_now().await;
        self.0.list_by_status(status).await
    }

    async fn update(&self, license: &License) -> Result<()> {
        tokio::task::yield_now().await;
        LicenseRepository::update(&*self.0, license).await
    }

    async fn bind_hardware(&self, license: &License) -> Result<bool> {
        tokio::task::yield_now().await;
        self.0.bind_hardware(license).await
    }

    async fn suspend_if_silent(
        &self,
        id: LicenseRecordId,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        tokio::task::yield_now().await;
        self.0.suspend_if_silent(id, cutoff, now).await
    }
}

#[async_trait]
impl PatchTokenRepository for Interleaving {
    async fn insert(&self, token: &PatchToken) -> Result<()> {
        tokio::task::yield_now().await;
        PatchTokenRepository::insert(&*self.0, token).await
    }

    async fn get(&self, id: PatchTokenId) -> Result<Option<PatchToken>> {
        tokio::task::yield_now().await;
        PatchTokenRepository::get(&*self.0, id).await
    }

    async fn get_by_token(&self, token: &str) -> Result<Option<PatchToken>> {
        tokio::task::yield_now().await;
        self.0.get_by_token(token).await
    }

    async fn list(&self) -> Result<Vec<PatchToken>> {
        tokio::task::yield_now().await;
        PatchTokenRepository::list(&*self.0).await
    }

    async fn update(&self, token: &PatchToken) -> Result<()> {
        tokio::task::yield_now().await;
        PatchTokenRepository::update(&*self.0, token).await
    }

    async fn update_if_status(&self, token: &PatchToken, expected: PatchStatus) -> Result<()> {
        tokio::task::yield_now().await;
        self.0.update_if_status(token, expected).await
    }

    async fn issue_license(&self, token_id: PatchTokenId, license: &License) -> Result<()> {
        tokio::task::yield_now().await;
        self.0.issue_license(token_id, license).await
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_repos(Repositories::from_store(Arc::new(MemoryStore::new())))
    }

    /// Like `new`, but license and token calls yield first.
    pub fn interleaved() -> Self {
        let store = Arc::new(MemoryStore::new());
        let interleaving = Arc::new(Interleaving(store.clone()));
        Self::with_repos(Repositories {
            licenses: interleaving.clone(),
            servers: store.clone(),
            patch_tokens: interleaving,
            activity: store,
        })
    }

    fn with_repos(repos: Repositories) -> Self {
        let clock = Arc::new(MockClock::from_rfc3339("2026-01-15T09:00:00Z"));
        let executor = Arc::new(RecordingExecutor::new());
        let scripts = ScriptRenderer::new("https://licenses.example.com", DEFAULT_KEY_PREFIX);
        let deployer = Arc::new(DeploymentOrchestrator::new(executor.clone(), scripts.clone()));
        let codec = Arc::new(RotatingXorCodec::new(DEFAULT_KEY_PREFIX, clock.clone()));

        Self {
            licenses: LicenseService::new(
                repos.clone(),
                deployer.clone(),
                codec,
                scripts.clone(),
                clock.clone(),
            ),
            servers: ServerService::new(repos.clone(), deployer, clock.clone()),
            patches: PatchService::new(
                repos.patch_tokens.clone(),
                repos.activity.clone(),
                scripts,
                clock.clone(),
            ),
            heartbeat: Arc::new(HeartbeatMonitor::new(
                repos.licenses.clone(),
                AuditTrail::new(repos.activity.clone(), clock.clone()),
                clock.clone(),
                HeartbeatConfig::default(),
            )),
            clock,
            executor,
            repos,
        }
    }

    pub fn set_target_machine(&self, name: &str) {
        self.executor.set_fingerprint(machine(name));
    }

    pub fn new_license(&self, name: &str, server_id: Option<ServerId>) -> NewLicense {
        NewLicense {
            license_id: name.to_string(),
            server_id,
            expires_at: self.licenses.days_from_now(30),
            max_users: 100,
            max_sites: 1,
            client_id: None,
            notes: None,
        }
    }

    pub async fn create_license(&self, name: &str, server_id: Option<ServerId>) -> License {
        self.licenses
            .create(self.new_license(name, server_id))
            .await
            .unwrap()
    }

    pub async fn server(&self, name: &str) -> Server {
        self.servers
            .create(NewServer {
                name: name.to_string(),
                host: format!("{name}.internal"),
                port: 22,
                username: "root".to_string(),
                password: "secret".to_string(),
            })
            .await
            .unwrap()
    }

    /// A server whose connectivity test saw `machine`.
    pub async fn probed_server(&self, name: &str, machine: &str) -> Server {
        let server = self.server(name).await;
        self.set_target_machine(machine);
        self.servers.test_connection(server.id).await.unwrap();
        self.servers.get(server.id).await.unwrap()
    }

    pub async fn has_audit(&self, action: AuditAction) -> bool {
        self.repos
            .activity
            .recent(1000)
            .await
            .unwrap()
            .iter()
            .any(|entry| entry.action == action)
    }
}
