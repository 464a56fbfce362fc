//! Wiring of stores, services and background tasks.

use crate::config::ServerConfig;
use leasehold_api::AppState;
use leasehold_cache::{EphemeralExchange, ResolverCache};
use leasehold_core::clock::{Clock, SystemClock};
use leasehold_core::codec::RotatingXorCodec;
use leasehold_db::{Database, MemoryStore};
use leasehold_deploy::{DeployTimeouts, DeploymentOrchestrator, ScriptRenderer, Ssh2Executor};
use leasehold_licensing::{
    AuditTrail, HeartbeatConfig, HeartbeatMonitor, LicenseService, PatchService, Repositories,
    ServerService,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Sweep period of the SSH host resolver cache.
const RESOLVER_SWEEP: Duration = Duration::from_secs(60);

pub struct Application {
    pub state: Arc<AppState>,
    pub heartbeat: Arc<HeartbeatMonitor>,
    resolver: Arc<ResolverCache>,
    config: ServerConfig,
}

/// Open the configured store. `force_memory` ignores `database_url`.
pub async fn open_store(
    config: &ServerConfig,
    force_memory: bool,
) -> anyhow::Result<(Repositories, Option<Database>)> {
    match (&config.database_url, force_memory) {
        (Some(url), false) => {
            let db = Database::connect(url).await?;
            db.migrate().await?;
            info!("Connected to PostgreSQL");
            let repos = Repositories {
                licenses: Arc::new(db.licenses()),
                servers: Arc::new(db.servers()),
                patch_tokens: Arc::new(db.patch_tokens()),
                activity: Arc::new(db.activity_logs()),
            };
            Ok((repos, Some(db)))
        }
        _ => {
            info!("Using in-memory store, data is lost on exit");
            Ok((Repositories::from_store(Arc::new(MemoryStore::new())), None))
        }
    }
}

impl Application {
    pub fn build(config: ServerConfig, repos: Repositories, database: Option<Database>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let scripts = ScriptRenderer::new(config.public_url(), config.codec.key_prefix.clone())
            .with_install_dir(config.agent.install_dir.clone())
            .with_agent_port(config.agent.port);

        let resolver = Arc::new(ResolverCache::new(clock.clone()));
        let executor = Arc::new(Ssh2Executor::new(resolver.clone()));
        let deployer = Arc::new(
            DeploymentOrchestrator::new(executor, scripts.clone()).with_timeouts(DeployTimeouts {
                probe: Duration::from_secs(config.ssh.probe_timeout_secs),
                deploy: Duration::from_secs(config.ssh.deploy_timeout_secs),
                undeploy: Duration::from_secs(config.ssh.undeploy_timeout_secs),
            }),
        );
        let codec = Arc::new(RotatingXorCodec::new(
            config.codec.key_prefix.clone(),
            clock.clone(),
        ));

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
            HeartbeatConfig {
                period: config.heartbeat_period(),
                threshold: config.heartbeat_threshold(),
            },
        ));
        let exchange = Arc::new(EphemeralExchange::new(clock, config.exchange_ttl()));

        let mut state = AppState::new(
            licenses,
            servers,
            patches,
            exchange,
            config.admin_token.clone(),
            config.public_url().to_string(),
        );
        if let Some(db) = database {
            state = state.with_database(db);
        }

        Self {
            state: Arc::new(state),
            heartbeat,
            resolver,
            config,
        }
    }

    /// Start the heartbeat monitor and cache sweepers.
    pub fn spawn_background(&self, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let heartbeat = self.heartbeat.clone();
        let heartbeat_rx = shutdown.clone();
        vec![
            tokio::spawn(async move { heartbeat.run(heartbeat_rx).await }),
            self.state
                .exchange
                .spawn_sweeper(self.config.exchange_sweep(), shutdown.clone()),
            self.resolver
                .spawn_sweeper(RESOLVER_SWEEP, shutdown.clone()),
        ]
    }
}
