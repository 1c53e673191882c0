//! # Beltrex Server
//!
//! Edge aggregator for a conveyor-belt computer-vision pipeline: ingests
//! upstream MJPEG sources, samples frames through an object detector and a
//! belt-status classifier, accumulates results into time-bucketed CSV
//! artifacts, and ships closed artifacts to an SFTP endpoint. This binary is
//! the thin HTTP adapter over `beltrex-core`.

/// Server configuration loading.
pub mod config;

/// Error types and HTTP mapping.
pub mod errors;

/// Route handlers.
pub mod handlers;

/// Route assembly.
pub mod routes;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use beltrex_core::db::Database;
use beltrex_core::health::HealthMonitorConfig;
use beltrex_core::inference::{InferenceProvider, StubInferenceProvider};
use beltrex_core::registry::{Resources, ResourcesConfig};
use beltrex_model::SourceKind;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;

/// Command line arguments for the Beltrex aggregator
#[derive(Parser, Debug)]
#[command(name = "beltrex-server")]
#[command(about = "Edge aggregator for conveyor-belt vision pipelines")]
struct Args {
    /// Path to a config file (TOML); defaults and env vars apply otherwise
    #[arg(long, env = "BELTREX_CONFIG")]
    config: Option<PathBuf>,

    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,
}

/// Server application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub resources: Arc<Resources>,
    pub provider: Arc<dyn InferenceProvider>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,beltrex_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    let config = Arc::new(config);

    let db = Database::open(&config.database_path).await?;

    // Real detection/classification backends are injected here; the stub
    // provider covers simulator deployments and scripted models.
    let provider: Arc<dyn InferenceProvider> = Arc::new(StubInferenceProvider);

    let resources = Resources::build(
        ResourcesConfig::new(config.storage_root.clone(), config.artifact_root.clone()),
        db,
        Arc::clone(&provider),
    )
    .await?;

    for kind in [SourceKind::Webcam, SourceKind::Legacy, SourceKind::Simulator] {
        resources.health.register(HealthMonitorConfig::new(
            kind.as_str(),
            config.health_url(kind),
        ));
    }
    resources.health.start_all();

    let state = AppState {
        config: Arc::clone(&config),
        resources: Arc::clone(&resources),
        provider,
    };
    let app = routes::create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("beltrex-server listening on {addr}");

    let grace = Duration::from_secs(config.shutdown_grace_seconds);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(grace))
        .await?;

    resources.shutdown(grace).await;
    Ok(())
}

/// Resolves when an interrupt arrives, after arming the failsafe exit.
async fn shutdown_signal(grace: Duration) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for interrupt: {err}");
        return;
    }
    info!("interrupt received, shutting down");

    // If the graceful path wedges, leave anyway.
    tokio::spawn(async move {
        tokio::time::sleep(grace + Duration::from_secs(10)).await;
        error!("graceful shutdown overran its grace period, forcing exit");
        std::process::exit(1);
    });
}
