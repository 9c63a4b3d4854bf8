//! HTTP client for the store service.
//!
//! Tries each configured endpoint in turn and sticks to the last one
//! that answered. Connection failures, timeouts and 5xx responses move
//! on to the next endpoint; when none answers the call fails with
//! `ClientError::Unavailable`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};
use keyroute_core::{ConfigError, RoutingConfig};
use keyroute_registry::{ClientError, CoordinationClient};
use keyroute_store::{SessionRecord, StoredEntry};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::http_client::{self, HttpResponse, encode_query_value};
use crate::response::ApiResponse;
use crate::store_service::{ClosedSession, CreateSessionRequest, DeleteOutcome, PutOutcome};

pub struct RemoteStoreClient {
    endpoints: Vec<String>,
    preferred: AtomicUsize,
    request_timeout: Duration,
}

impl RemoteStoreClient {
    pub fn new(endpoints: Vec<String>, request_timeout: Duration) -> Self {
        Self {
            endpoints,
            preferred: AtomicUsize::new(0),
            request_timeout,
        }
    }

    pub fn from_config(config: &RoutingConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.store.endpoints.clone(),
            config.request_timeout()?,
        ))
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    async fn call(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<(Bytes, &'static str)>,
    ) -> Result<HttpResponse, ClientError> {
        if self.endpoints.is_empty() {
            return Err(ClientError::Unavailable("no store endpoints configured".into()));
        }
        let start = self.preferred.load(Ordering::Relaxed);
        let mut last_error = String::new();

        for offset in 0..self.endpoints.len() {
            let idx = (start + offset) % self.endpoints.len();
            let endpoint = &self.endpoints[idx];
            match http_client::send(
                endpoint,
                method.clone(),
                path_and_query,
                body.clone(),
                self.request_timeout,
            )
            .await
            {
                Ok(resp) if resp.status.is_server_error() => {
                    last_error = format!("{endpoint} answered {}", resp.status);
                    warn!(%endpoint, status = %resp.status, "store endpoint failing");
                }
                Ok(resp) => {
                    if idx != start {
                        debug!(%endpoint, "switched store endpoint");
                        self.preferred.store(idx, Ordering::Relaxed);
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    last_error = e.to_string();
                    debug!(%endpoint, error = %e, "store endpoint unreachable");
                }
            }
        }
        Err(ClientError::Unavailable(last_error))
    }
}

/// Unwrap a store service envelope.
fn decode<T: DeserializeOwned>(resp: HttpResponse) -> Result<T, ClientError> {
    let envelope: ApiResponse<T> = serde_json::from_slice(&resp.body)
        .map_err(|e| ClientError::Store(format!("bad response ({}): {e}", resp.status)))?;
    if resp.status.is_success() {
        return envelope
            .data
            .ok_or_else(|| ClientError::Store("response without data".into()));
    }
    let message = envelope.error.unwrap_or_else(|| resp.status.to_string());
    match resp.status {
        StatusCode::GONE => Err(ClientError::SessionExpired(message)),
        _ => Err(ClientError::Store(message)),
    }
}

fn entry_query(path: &str, param: &str, value: Option<&str>) -> String {
    let mut query = format!("/v1/entries?path={}", encode_query_value(path));
    if let Some(value) = value {
        query.push_str(&format!("&{param}={}", encode_query_value(value)));
    }
    query
}

#[async_trait]
impl CoordinationClient for RemoteStoreClient {
    async fn create_session(&self, ttl: Duration) -> Result<SessionRecord, ClientError> {
        let body = serde_json::to_vec(&CreateSessionRequest {
            ttl_ms: ttl.as_millis() as u64,
        })
        .map_err(|e| ClientError::Store(e.to_string()))?;
        let resp = self
            .call(
                Method::POST,
                "/v1/sessions",
                Some((Bytes::from(body), "application/json")),
            )
            .await?;
        decode(resp)
    }

    async fn keep_alive(&self, session: &str) -> Result<SessionRecord, ClientError> {
        let path = format!("/v1/sessions/{}", encode_query_value(session));
        decode(self.call(Method::PUT, &path, None).await?)
    }

    async fn close_session(&self, session: &str) -> Result<bool, ClientError> {
        let path = format!("/v1/sessions/{}", encode_query_value(session));
        let closed: ClosedSession = decode(self.call(Method::DELETE, &path, None).await?)?;
        Ok(closed.closed)
    }

    async fn put(
        &self,
        path: &str,
        value: &[u8],
        session: Option<&str>,
    ) -> Result<u64, ClientError> {
        let query = entry_query(path, "session", session);
        let body = Bytes::copy_from_slice(value);
        let resp = self
            .call(Method::PUT, &query, Some((body, "application/octet-stream")))
            .await?;
        let outcome: PutOutcome = decode(resp)?;
        Ok(outcome.version)
    }

    async fn get(&self, path: &str) -> Result<Option<StoredEntry>, ClientError> {
        let resp = self
            .call(Method::GET, &entry_query(path, "", None), None)
            .await?;
        if resp.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(resp).map(Some)
    }

    async fn delete(&self, path: &str, owner: Option<&str>) -> Result<bool, ClientError> {
        let resp = self
            .call(Method::DELETE, &entry_query(path, "owner", owner), None)
            .await?;
        let outcome: DeleteOutcome = decode(resp)?;
        Ok(outcome.removed)
    }
}
