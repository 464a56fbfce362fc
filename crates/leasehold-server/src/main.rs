//! Leasehold license server entrypoint.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

mod app;
mod config;
mod telemetry;

use app::{Application, open_store};
use config::ServerConfig;

#[derive(Parser)]
#[command(name = "leaseholdd")]
#[command(author, version, about = "Leasehold license server", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./leasehold.yaml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server and background tasks.
    Serve {
        /// Ignore database_url and keep everything in memory.
        #[arg(long)]
        memory: bool,
    },
    /// Apply database migrations and exit.
    Migrate,
    /// Run one heartbeat sweep and exit.
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = ServerConfig::load(cli.config.as_deref())?;
    telemetry::init_tracing(&config.log.format);

    match cli.command {
        Commands::Serve { memory } => serve(config, memory).await,
        Commands::Migrate => migrate(config).await,
        Commands::Sweep => sweep(config).await,
    }
}

async fn serve(config: ServerConfig, memory: bool) -> anyhow::Result<()> {
    let bind = config.bind.clone();
    let (repos, database) = open_store(&config, memory).await?;
    let app = Application::build(config, repos, database);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = app.spawn_background(&shutdown_rx);

    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(addr = %bind, "Leasehold listening");

    let router = leasehold_api::build_app(app.state.clone());
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
        })
        .await
        .context("server error")?;

    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Background task failed");
        }
    }
    info!("Leasehold stopped");
    Ok(())
}

async fn migrate(config: ServerConfig) -> anyhow::Result<()> {
    let url = config
        .database_url
        .as_deref()
        .context("database_url is not configured")?;
    let db = leasehold_db::Database::connect(url).await?;
    db.migrate().await?;
    info!("Migrations applied");
    Ok(())
}

async fn sweep(config: ServerConfig) -> anyhow::Result<()> {
    let (repos, database) = open_store(&config, false).await?;
    let app = Application::build(config, repos, database);
    let suspended = app.heartbeat.sweep().await?;
    info!(count = suspended.len(), "Heartbeat sweep complete");
    Ok(())
}
