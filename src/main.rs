//! Local Store - An embedded filesystem-backed key-value store
//!
//! Opens the configured store and keeps its TTL eviction sweeper running
//! until the process is asked to stop.

use anyhow::{Context, Result};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use localstore::{LocalStore, StoreConfig};

/// Main entry point for the local store.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the store and start the eviction sweeper
/// 4. Wait for SIGINT/SIGTERM
/// 5. Stop the sweeper and exit
#[tokio::main]
async fn main() -> Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "localstore=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting local store");

    let config = StoreConfig::from_env();
    info!(
        "Configuration loaded: capacity={} bytes, sweep_interval={}ms, lock_retries={}",
        config.capacity,
        config.sweep_interval.as_millis(),
        config.lock.retries
    );

    let store = LocalStore::open(config)
        .await
        .context("Failed to open local store")?;

    let stats = store.stats().await.context("Failed to read store usage")?;
    info!(
        "Store opened: {}",
        serde_json::to_string(&stats).context("Failed to serialize store usage")?
    );

    shutdown_signal().await;

    store.shutdown().await;
    info!("Local store shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
