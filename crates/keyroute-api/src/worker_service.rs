//! Worker state service.
//!
//! A worker answers point queries only for keys it currently holds;
//! anything else is a 404, which tells the router its resolution was
//! stale.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use keyroute_core::KeyEncodingError;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::response::{ApiResponse, error_response, healthz};

/// Values of the keys this worker holds, keyed by the key's JSON text.
#[derive(Clone, Default)]
pub struct WorkerState {
    values: Arc<RwLock<HashMap<String, Value>>>,
}

/// Canonical map key for a decoded URL segment.
///
/// `5`, `"abc"` and bare `abc` (a string key) all normalize to the JSON
/// text `serde_json` would produce for the key.
fn canonical(segment: &str) -> String {
    match serde_json::from_str::<Value>(segment) {
        Ok(value) => value.to_string(),
        Err(_) => Value::String(segment.to_string()).to_string(),
    }
}

impl WorkerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `key` with its current value.
    pub fn hold<K: Serialize>(&self, key: &K, value: Value) -> Result<(), KeyEncodingError> {
        let json = serde_json::to_string(key).map_err(|e| KeyEncodingError(e.to_string()))?;
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(canonical(&json), value);
        Ok(())
    }

    /// Stop answering for `key`. Returns whether it was held.
    pub fn release<K: Serialize>(&self, key: &K) -> Result<bool, KeyEncodingError> {
        let json = serde_json::to_string(key).map_err(|e| KeyEncodingError(e.to_string()))?;
        Ok(self
            .values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&canonical(&json))
            .is_some())
    }

    fn lookup(&self, segment: &str) -> Option<Value> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&canonical(segment))
            .cloned()
    }

    fn store(&self, segment: &str, value: Value) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(canonical(segment), value);
    }

    pub fn len(&self) -> usize {
        self.values.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn worker_router(state: WorkerState) -> Router {
    Router::new()
        .route("/v1/state/{key}", get(get_state).put(put_state))
        .with_state(state)
        .route("/healthz", get(healthz))
}

/// GET /v1/state/{key}
pub async fn get_state(
    State(state): State<WorkerState>,
    Path(segment): Path<String>,
) -> impl IntoResponse {
    match state.lookup(&segment) {
        Some(value) => ApiResponse::ok(value).into_response(),
        None => {
            debug!(key = %segment, "state query for key not held here");
            error_response("key not held by this worker", StatusCode::NOT_FOUND)
        }
    }
}

/// PUT /v1/state/{key}
///
/// Only updates keys the worker already holds.
pub async fn put_state(
    State(state): State<WorkerState>,
    Path(segment): Path<String>,
    Json(value): Json<Value>,
) -> impl IntoResponse {
    if state.lookup(&segment).is_none() {
        return error_response("key not held by this worker", StatusCode::NOT_FOUND);
    }
    state.store(&segment, value.clone());
    ApiResponse::ok(value).into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;

    #[test]
    fn canonical_forms_agree() {
        assert_eq!(canonical("5"), "5");
        assert_eq!(canonical("\"abc\""), "\"abc\"");
        assert_eq!(canonical("abc"), "\"abc\"");
    }

    #[tokio::test]
    async fn held_key_is_served() {
        let state = WorkerState::new();
        state.hold(&5i64, json!(42)).unwrap();
        let router = worker_router(state);

        let req = Request::builder()
            .uri("/v1/state/5")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unheld_key_is_not_found() {
        let router = worker_router(WorkerState::new());
        let req = Request::builder()
            .uri("/v1/state/5")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn released_key_is_not_served() {
        let state = WorkerState::new();
        state.hold(&"abc".to_string(), json!("v")).unwrap();
        assert!(state.release(&"abc".to_string()).unwrap());
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn put_updates_held_key_only() {
        let state = WorkerState::new();
        state.hold(&5i64, json!(1)).unwrap();
        let router = worker_router(state.clone());

        let req = Request::builder()
            .method("PUT")
            .uri("/v1/state/5")
            .header("content-type", "application/json")
            .body(Body::from("2"))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.lookup("5"), Some(json!(2)));

        let req = Request::builder()
            .method("PUT")
            .uri("/v1/state/6")
            .header("content-type", "application/json")
            .body(Body::from("2"))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
