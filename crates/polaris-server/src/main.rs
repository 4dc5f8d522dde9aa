mod configuration;
mod error;
mod routes;
mod state;

use anyhow::Context;
use configuration::Settings;
use polaris::cluster::snapshot::SnapshotStore;
use state::AppState;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::new().context("failed to load configuration")?;

    let store = match &settings.cluster.snapshot_path {
        Some(path) => SnapshotStore::load(path)
            .with_context(|| format!("failed to load cluster snapshots from {}", path.display()))?,
        None => SnapshotStore::new(),
    };

    if !settings.ai.enabled {
        info!("AI assistant is disabled until configured through /ai/config");
    }

    let state = AppState::new(settings.ai, settings.chat, Arc::new(store));

    // Create router with CORS support
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::configure(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = settings.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
