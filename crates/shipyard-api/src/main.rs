//! Shipyard API Server

use anyhow::Context;
use shipyard_api::{AppState, routes};
use shipyard_config::load_stack;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const APPROVAL_REAPER_INTERVAL: Duration = Duration::from_secs(30);

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("SHIPYARD_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config_path =
        std::env::var("SHIPYARD_CONFIG").unwrap_or_else(|_| "shipyard.kdl".to_string());
    let stack = load_stack(&config_path)
        .with_context(|| format!("loading stack configuration {}", config_path))?;
    info!(
        pipeline = %stack.pipeline.name,
        branch = %stack.pipeline.source.branch,
        "Loaded stack configuration"
    );

    let addr: SocketAddr = stack
        .server
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {}", stack.server.listen))?;

    let database_url = std::env::var("DATABASE_URL").ok();
    let state = AppState::from_stack(stack, database_url.as_deref()).await?;

    let interrupted = state
        .orchestrator
        .recover_interrupted()
        .await
        .context("recovering interrupted runs")?;
    if !interrupted.is_empty() {
        warn!(count = interrupted.len(), "Failed runs interrupted by the last shutdown");
    }

    let reaper = state
        .orchestrator
        .spawn_approval_reaper(APPROVAL_REAPER_INTERVAL);

    // Build router
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("Starting server on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    reaper.abort();
    Ok(())
}
