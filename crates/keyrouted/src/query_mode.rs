//! Query mode: route queries from the command line.
//!
//! Prints one JSON line per query, in the same shape the query service
//! answers with, so the output can be piped into other tools.

use std::sync::Arc;
use std::time::Duration;

use keyroute_api::{HttpTransport, QueryResponse, RemoteStoreClient};
use keyroute_core::{RoutingConfig, decode_key};
use keyroute_registry::{CoordinationClient, RoutingContext};
use keyroute_router::QueryRouter;
use serde_json::Value;
use tracing::debug;

pub async fn run_query(
    config: RoutingConfig,
    key: &str,
    repeat: u32,
    interval_ms: u64,
) -> anyhow::Result<()> {
    let key: i64 = decode_key(key)?;
    let client: Arc<dyn CoordinationClient> = Arc::new(RemoteStoreClient::from_config(&config)?);
    let ctx = RoutingContext::from_config(&config, client)?;
    let router: QueryRouter<i64, Value, HttpTransport> =
        QueryRouter::from_context(&ctx, HttpTransport::default());

    let mut failures = 0u32;
    for round in 1..=repeat.max(1) {
        if round > 1 {
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        }
        let response = match router.query(&key).await {
            Ok(outcome) => QueryResponse::Ok {
                value: outcome.value,
                attempts_used: outcome.attempts,
                location: outcome.location,
            },
            Err(failure) => {
                failures += 1;
                QueryResponse::Failed {
                    failure: failure.descriptor(),
                }
            }
        };
        debug!(round, key, "query finished");
        println!("{}", serde_json::to_string(&response)?);
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} queries failed", repeat.max(1));
    }
    Ok(())
}
