//! Test helper functions and utilities.

use leasehold_api::{AppState, build_app};
use leasehold_cache::EphemeralExchange;
use leasehold_cache::exchange::MAX_TTL;
use chrono::{DateTime, Utc};
use leasehold_core::clock::{Clock, MockClock};
use leasehold_core::codec::{DEFAULT_KEY_PREFIX, RotatingXorCodec};
use leasehold_db::MemoryStore;
use leasehold_deploy::{DeploymentOrchestrator, RecordingExecutor, ScriptRenderer};
use leasehold_licensing::{
    AuditTrail, HeartbeatConfig, HeartbeatMonitor, LicenseService, PatchService, Repositories,
    ServerService,
};
use reqwest::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub const ADMIN_TOKEN: &str = "test-admin-token";
pub const PUBLIC_URL: &str = "https://licenses.example.test";
pub const START_TIME: &str = "2026-03-01T12:00:00Z";

/// A running server with handles on its time and remote side.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: ApiTestClient,
    pub clock: Arc<MockClock>,
    pub executor: Arc<RecordingExecutor>,
    pub heartbeat: Arc<HeartbeatMonitor>,
    pub exchange: Arc<EphemeralExchange>,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Start on the in-memory store.
    pub async fn spawn() -> anyhow::Result<Self> {
        Self::spawn_with(Repositories::from_store(Arc::new(MemoryStore::new()))).await
    }

    /// Start on the given repositories.
    pub async fn spawn_with(repos: Repositories) -> anyhow::Result<Self> {
        crate::init_test_logging();

        let clock = Arc::new(MockClock::from_rfc3339(START_TIME));
        let executor = Arc::new(RecordingExecutor::new());
        let scripts = ScriptRenderer::new(PUBLIC_URL, DEFAULT_KEY_PREFIX);
        let deployer = Arc::new(DeploymentOrchestrator::new(
            executor.clone(),
            scripts.clone(),
        ));
        let codec = Arc::new(RotatingXorCodec::new(DEFAULT_KEY_PREFIX, clock.clone()));

        let licenses = Arc::new(LicenseService::new(
            repos.clone(),
            deployer.clone(),
            codec,
            scripts.clone(),
            clock.clone(),
        ));
        let servers = Arc::new(ServerService::new(repos.clone(), deployer, clock.clone()));
        let patches = Arc::new(PatchService::new(
            repos.patch_tokens.clone(),
            repos.activity.clone(),
            scripts,
            clock.clone(),
        ));
        let heartbeat = Arc::new(HeartbeatMonitor::new(
            repos.licenses.clone(),
            AuditTrail::new(repos.activity.clone(), clock.clone()),
            clock.clone(),
            HeartbeatConfig::default(),
        ));
        let exchange = Arc::new(EphemeralExchange::new(clock.clone(), MAX_TTL));

        let state = Arc::new(AppState::new(
            licenses,
            servers,
            patches,
            exchange.clone(),
            ADMIN_TOKEN,
            PUBLIC_URL,
        ));

        let app = build_app(state);
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Ok(Self {
            addr,
            client: ApiTestClient::new(addr),
            clock,
            executor,
            heartbeat,
            exchange,
            _handle: handle,
        })
    }

    /// Current time on the server's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now_utc()
    }
}

/// Create an HTTP client for testing.
pub fn test_client() -> Client {
    Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .expect("Failed to create test client")
}

/// API test client with base URL. `admin_*` calls send the bearer token.
pub struct ApiTestClient {
    client: Client,
    base_url: String,
}

impl ApiTestClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            client: test_client(),
            base_url: format!("http://{addr}"),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client.get(self.url(path)).send().await
    }

    pub async fn post<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> reqwest::Result<reqwest::Response> {
        self.client.post(self.url(path)).json(body).send().await
    }

    pub async fn admin_get(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client
            .get(self.url(path))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
    }

    pub async fn admin_post<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> reqwest::Result<reqwest::Response> {
        self.client
            .post(self.url(path))
            .bearer_auth(ADMIN_TOKEN)
            .json(body)
            .send()
            .await
    }

    pub async fn admin_post_bytes(
        &self,
        path: &str,
        body: Vec<u8>,
    ) -> reqwest::Result<reqwest::Response> {
        self.client
            .post(self.url(path))
            .bearer_auth(ADMIN_TOKEN)
            .body(body)
            .send()
            .await
    }

    pub async fn admin_patch<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> reqwest::Result<reqwest::Response> {
        self.client
            .patch(self.url(path))
            .bearer_auth(ADMIN_TOKEN)
            .json(body)
            .send()
            .await
    }

    pub async fn admin_delete(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client
            .delete(self.url(path))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
    }

    /// Check health endpoint.
    pub async fn health(&self) -> anyhow::Result<bool> {
        let resp = self.get("/api/health").await?;
        Ok(resp.status().is_success())
    }
}
