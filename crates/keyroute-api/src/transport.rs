//! HTTP query transport: `GET /v1/state/{key}` on the worker at a location.

use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use keyroute_core::{Location, RegistryKey, url_segment};
use keyroute_router::{QueryError, QueryTransport};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::http_client::{self, HttpError};
use crate::response::ApiResponse;

/// Sends state queries to worker state services.
///
/// A `Location` is the worker's `host:port`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    timeout: Duration,
}

impl HttpTransport {
    /// `timeout` caps a single exchange; the router's per-attempt deadline
    /// usually fires first.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl<K, V> QueryTransport<K, V> for HttpTransport
where
    K: RegistryKey,
    V: DeserializeOwned + Send,
{
    async fn send(&self, location: &Location, key: &K) -> Result<V, QueryError> {
        let segment = url_segment(key).map_err(|e| QueryError::RemoteRejected(e.to_string()))?;
        let path = format!("/v1/state/{segment}");

        let resp = http_client::send(location.as_str(), Method::GET, &path, None, self.timeout)
            .await
            .map_err(|e| match e {
                HttpError::Timeout { timeout, .. } => QueryError::Timeout(timeout),
                other => QueryError::TransportFailure(other.to_string()),
            })?;

        if resp.status.is_server_error() {
            return Err(QueryError::TransportFailure(format!(
                "{location} answered {}",
                resp.status
            )));
        }
        if !resp.status.is_success() {
            let message = serde_json::from_slice::<ApiResponse<serde_json::Value>>(&resp.body)
                .ok()
                .and_then(|envelope| envelope.error)
                .unwrap_or_else(|| resp.status.to_string());
            debug!(%location, status = %resp.status, %message, "worker rejected query");
            return Err(QueryError::RemoteRejected(message));
        }
        let envelope: ApiResponse<V> = serde_json::from_slice(&resp.body).map_err(|e| {
            QueryError::TransportFailure(format!("unreadable response from {location}: {e}"))
        })?;
        envelope
            .data
            .ok_or_else(|| QueryError::TransportFailure("response without data".into()))
    }
}
