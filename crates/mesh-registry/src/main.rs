//! mesh-registry binary: parse flags, open the store, recover the
//! directory, start the liveness sweeper, serve HTTP until a signal.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mesh_core::env;
use mesh_registry::api::{self, ApiContext};
use mesh_registry::{liveness, LivenessConfig, MeshState, RegistryService, SqliteStore, TraceStore};

#[derive(Debug, Parser)]
#[command(name = "mesh-registry")]
#[command(about = "MCP Mesh registry: agent directory, resolver, liveness monitor and call proxy", long_about = None)]
#[command(version)]
struct Args {
    /// Host to bind
    #[arg(long, env = env::REGISTRY_HOST, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind
    #[arg(long, env = env::REGISTRY_PORT, default_value_t = 8000)]
    port: u16,

    /// Path of the registry database file
    #[arg(long, env = env::DB_PATH, default_value = env::DEFAULT_DB_FILE)]
    db: String,

    /// Log level filter (trace, debug, info, warn, error)
    #[arg(long, env = env::LOG_LEVEL, default_value = "info")]
    log_level: String,

    /// Per-agent-type liveness thresholds as type=timeout_s:eviction_s
    /// (repeatable, e.g. --liveness-override llm-provider=30:60)
    #[arg(long = "liveness-override", env = env::LIVENESS_OVERRIDES, value_delimiter = ',')]
    liveness_overrides: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store = SqliteStore::open(&args.db)
        .await
        .with_context(|| format!("opening registry database {}", args.db))?;
    let state = MeshState::new();
    let traces = TraceStore::default();
    let liveness_config = LivenessConfig::default()
        .with_override_specs(&args.liveness_overrides)
        .context("parsing liveness overrides")?;

    let service = Arc::new(RegistryService::new(
        store.clone(),
        state.clone(),
        traces,
        liveness_config.clone(),
    ));
    service.recover().await?;

    let cancel = CancellationToken::new();
    let sweeper = tokio::spawn(liveness::run_sweeper(
        state,
        store,
        liveness_config,
        cancel.clone(),
    ));

    let app = api::router(ApiContext::new(service));
    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(addr = %addr, db = %args.db, "mesh-registry listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    let _ = sweeper.await;
    info!("mesh-registry stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
