//! Worker mode: owns keys and serves their state.
//!
//! In this mode, the daemon:
//! 1. Opens a session on the coordination store
//! 2. Registers each of its keys → its advertised location
//! 3. Keeps the session alive while serving state queries
//! 4. On Ctrl-C (or session loss), deregisters and closes the session

use std::net::SocketAddr;
use std::sync::Arc;

use keyroute_api::{RemoteStoreClient, WorkerState, worker_router};
use keyroute_core::{Location, RoutingConfig};
use keyroute_registry::{CoordinationClient, RoutingContext};
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Run a worker holding `keys` until shutdown.
pub async fn run_worker(
    config: RoutingConfig,
    port: u16,
    advertise: String,
    keys: Vec<i64>,
) -> anyhow::Result<()> {
    info!(%advertise, keys = ?keys, "keyroute worker starting");

    let client: Arc<dyn CoordinationClient> = Arc::new(RemoteStoreClient::from_config(&config)?);
    let ctx = RoutingContext::from_config(&config, client)?;

    // ── Session ────────────────────────────────────────────────
    let session = ctx.open_session().await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let keepalive_handle = {
        let session = session.clone();
        let interval = ctx.keepalive_interval();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { session.run_keepalive(interval, shutdown).await })
    };

    // ── Hold and register keys ─────────────────────────────────
    let state = WorkerState::new();
    let registry = ctx.registry::<i64>(session.clone());
    let location = Location::new(advertise.clone());
    for key in &keys {
        state.hold(key, json!({ "key": key, "owner": advertise }))?;
        registry.register(key, &location).await?;
    }
    info!(count = keys.len(), %location, "keys registered");

    // ── State service ──────────────────────────────────────────
    let router = worker_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "worker state service starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let mut expired = session.expired();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!(error = %e, "failed to listen for ctrl-c");
                    }
                    info!("shutdown signal received");
                }
                _ = expired.wait_for(|lost| *lost) => {
                    error!("session lost; registrations are gone, stopping worker");
                }
            }
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = keepalive_handle.await;

    // ── Graceful retraction ────────────────────────────────────
    if !session.is_expired() {
        for key in &keys {
            if let Err(e) = registry.deregister(key).await {
                warn!(key, error = %e, "deregister failed");
            }
        }
        if let Err(e) = session.close().await {
            warn!(error = %e, "session close failed");
        }
    }

    info!("keyroute worker stopped");
    Ok(())
}
