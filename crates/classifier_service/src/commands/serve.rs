//! Serve command - runs the HTTP API until interrupted.

use anyhow::{Context, Result};
use config::Config;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::{engine, open_store};
use crate::api::{AppState, router};

/// Runs the serve command.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the address cannot be bound.
pub async fn run(config: Config) -> Result<()> {
    let store = open_store(&config)?;
    match store.current_generation() {
        Some(generation) => info!(generation, "Serving promoted model"),
        None => warn!("No model promoted yet, /predict will fail until a retrain completes"),
    }

    let bind_addr = config.bind_addr;
    let app = router(AppState::new(config, store, engine()));

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    info!(address = %bind_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
