//! Store mode: serves the coordination store.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use keyroute_store::CoordStore;
use tokio::sync::watch;
use tracing::{info, warn};

/// Run the store service until Ctrl-C.
pub async fn run_store(
    port: u16,
    data_dir: Option<PathBuf>,
    reap_interval_ms: u64,
) -> anyhow::Result<()> {
    info!("keyroute store starting");

    let store = match &data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let db_path = dir.join("keyroute.redb");
            let store = CoordStore::open(&db_path)?;
            info!(path = ?db_path, "coordination store opened");
            store
        }
        None => {
            info!("coordination store running in memory");
            CoordStore::open_in_memory()?
        }
    };

    // ── Shutdown signal ────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Session reaper ─────────────────────────────────────────
    let reaper_handle = {
        let store = store.clone();
        let interval = Duration::from_millis(reap_interval_ms.max(1));
        tokio::spawn(async move { store.run_reaper(interval, shutdown_rx).await })
    };

    // ── Store service ──────────────────────────────────────────
    let router = keyroute_api::store_router(store);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "store service starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = reaper_handle.await;
    info!("keyroute store stopped");
    Ok(())
}
