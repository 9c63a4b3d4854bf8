//! Router mode: serves the caller-facing query service.

use std::net::SocketAddr;
use std::sync::Arc;

use keyroute_api::{HttpTransport, RemoteStoreClient, query_router};
use keyroute_core::{RoutingConfig, format_duration};
use keyroute_registry::{CoordinationClient, RoutingContext};
use keyroute_router::QueryRouter;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, warn};

pub async fn run_router(config: RoutingConfig, port: u16) -> anyhow::Result<()> {
    info!("keyroute router starting");

    let client: Arc<dyn CoordinationClient> = Arc::new(RemoteStoreClient::from_config(&config)?);
    let ctx = RoutingContext::from_config(&config, client)?;
    let router: QueryRouter<i64, Value, HttpTransport> =
        QueryRouter::from_context(&ctx, HttpTransport::default());
    let policy = router.policy();
    info!(
        attempts = policy.max_attempts,
        per_attempt = %format_duration(policy.per_attempt_timeout),
        worst_case = %format_duration(policy.worst_case_latency()),
        "query router ready"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    // Only watch-capable clients get an invalidator; HTTP store clients rely
    // on the cache TTL and on invalidation after failed queries.
    let invalidator = router.resolver().spawn_invalidator(shutdown_rx);

    let app = query_router(Arc::new(router));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "query service starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    if let Some(handle) = invalidator {
        let _ = handle.await;
    }
    info!("keyroute router stopped");
    Ok(())
}
