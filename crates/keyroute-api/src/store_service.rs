//! Coordination store service.
//!
//! Exposes a [`CoordStore`] over HTTP so workers, routers and query
//! clients in separate processes share one store.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/v1/sessions` | Open a session (`{"ttl_ms": 10000}`) |
//! | PUT | `/v1/sessions/{id}` | Renew a session (410 once expired) |
//! | DELETE | `/v1/sessions/{id}` | Close a session and drop its entries |
//! | GET | `/v1/entries?path=` | Read a live entry |
//! | PUT | `/v1/entries?path=&session=` | Write an entry (raw body) |
//! | DELETE | `/v1/entries?path=&owner=` | Delete an entry |
//! | GET | `/v1/list?prefix=` | List live entries under a prefix |
//! | GET | `/healthz` | Liveness |

use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Json;
use keyroute_store::{CoordStore, StoreError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::response::{ApiResponse, error_response, healthz};

#[derive(Clone)]
pub struct StoreState {
    pub store: CoordStore,
}

pub fn store_router(store: CoordStore) -> Router {
    let state = StoreState { store };
    let routes = Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", put(keep_alive).delete(close_session))
        .route("/entries", get(get_entry).put(put_entry).delete(delete_entry))
        .route("/list", get(list_entries))
        .with_state(state);

    Router::new()
        .nest("/v1", routes)
        .route("/healthz", get(healthz))
}

fn store_error(e: StoreError) -> Response {
    match e {
        StoreError::SessionExpired(id) => {
            error_response(&format!("session expired: {id}"), StatusCode::GONE)
        }
        other => error_response(&other.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

// ── Sessions ───────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub ttl_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClosedSession {
    pub closed: bool,
}

/// POST /v1/sessions
pub async fn create_session(
    State(state): State<StoreState>,
    Json(req): Json<CreateSessionRequest>,
) -> impl IntoResponse {
    if req.ttl_ms == 0 {
        return error_response("ttl_ms must be positive", StatusCode::BAD_REQUEST);
    }
    match state.store.create_session(Duration::from_millis(req.ttl_ms)) {
        Ok(record) => (StatusCode::CREATED, ApiResponse::ok(record)).into_response(),
        Err(e) => store_error(e),
    }
}

/// PUT /v1/sessions/{id}
pub async fn keep_alive(
    State(state): State<StoreState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.keep_alive(&id) {
        Ok(record) => ApiResponse::ok(record).into_response(),
        Err(e) => store_error(e),
    }
}

/// DELETE /v1/sessions/{id}
pub async fn close_session(
    State(state): State<StoreState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.close_session(&id) {
        Ok(closed) => ApiResponse::ok(ClosedSession { closed }).into_response(),
        Err(e) => store_error(e),
    }
}

// ── Entries ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EntryParams {
    pub path: String,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutOutcome {
    pub version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub removed: bool,
}

/// GET /v1/entries?path=
pub async fn get_entry(
    State(state): State<StoreState>,
    Query(params): Query<EntryParams>,
) -> impl IntoResponse {
    match state.store.get(&params.path) {
        Ok(Some(entry)) => ApiResponse::ok(entry).into_response(),
        Ok(None) => error_response("entry not found", StatusCode::NOT_FOUND),
        Err(e) => store_error(e),
    }
}

/// PUT /v1/entries?path=&session=
pub async fn put_entry(
    State(state): State<StoreState>,
    Query(params): Query<EntryParams>,
    body: Bytes,
) -> impl IntoResponse {
    if !params.path.starts_with('/') {
        return error_response("path must be absolute", StatusCode::BAD_REQUEST);
    }
    match state
        .store
        .put(&params.path, &body, params.session.as_deref())
    {
        Ok(version) => {
            debug!(path = %params.path, version, "entry written over http");
            ApiResponse::ok(PutOutcome { version }).into_response()
        }
        Err(e) => store_error(e),
    }
}

/// DELETE /v1/entries?path=&owner=
pub async fn delete_entry(
    State(state): State<StoreState>,
    Query(params): Query<EntryParams>,
) -> impl IntoResponse {
    match state.store.delete(&params.path, params.owner.as_deref()) {
        Ok(removed) => ApiResponse::ok(DeleteOutcome { removed }).into_response(),
        Err(e) => store_error(e),
    }
}

/// GET /v1/list?prefix=
pub async fn list_entries(
    State(state): State<StoreState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    match state.store.list(&params.prefix) {
        Ok(entries) => ApiResponse::ok(entries).into_response(),
        Err(e) => store_error(e),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use keyroute_store::{SessionRecord, StoredEntry};
    use tower::ServiceExt;

    use super::*;

    fn test_router() -> (CoordStore, Router) {
        let store = CoordStore::open_in_memory().unwrap();
        (store.clone(), store_router(store))
    }

    async fn body_json<T: serde::de::DeserializeOwned>(resp: Response) -> ApiResponse<T> {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn create_session_returns_record() {
        let (_, router) = test_router();
        let req = Request::builder()
            .method("POST")
            .uri("/v1/sessions")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"ttl_ms":5000}"#))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: ApiResponse<SessionRecord> = body_json(resp).await;
        assert_eq!(body.data.unwrap().ttl_ms, 5000);
    }

    #[tokio::test]
    async fn keep_alive_unknown_session_is_gone() {
        let (_, router) = test_router();
        let req = Request::builder()
            .method("PUT")
            .uri("/v1/sessions/session-missing")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn put_and_get_entry() {
        let (store, router) = test_router();
        let session = store.create_session(Duration::from_secs(5)).unwrap();

        let req = Request::builder()
            .method("PUT")
            .uri(format!("/v1/entries?path=/test/5&session={}", session.id))
            .body(Body::from("worker-a"))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let req = Request::builder()
            .uri("/v1/entries?path=/test/5")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: ApiResponse<StoredEntry> = body_json(resp).await;
        let entry = body.data.unwrap();
        assert_eq!(entry.value, b"worker-a");
        assert_eq!(entry.session.as_deref(), Some(session.id.as_str()));
    }

    #[tokio::test]
    async fn put_under_expired_session_is_gone() {
        let (_, router) = test_router();
        let req = Request::builder()
            .method("PUT")
            .uri("/v1/entries?path=/test/5&session=session-missing")
            .body(Body::from("x"))
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn missing_entry_is_not_found() {
        let (_, router) = test_router();
        let req = Request::builder()
            .uri("/v1/entries?path=/test/404")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_respects_owner() {
        let (store, router) = test_router();
        let session = store.create_session(Duration::from_secs(5)).unwrap();
        store.put("/test/5", b"x", Some(&session.id)).unwrap();

        let req = Request::builder()
            .method("DELETE")
            .uri("/v1/entries?path=/test/5&owner=session-other")
            .body(Body::empty())
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let body: ApiResponse<DeleteOutcome> = body_json(resp).await;
        assert!(!body.data.unwrap().removed);

        let req = Request::builder()
            .method("DELETE")
            .uri(format!("/v1/entries?path=/test/5&owner={}", session.id))
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        let body: ApiResponse<DeleteOutcome> = body_json(resp).await;
        assert!(body.data.unwrap().removed);
    }

    #[tokio::test]
    async fn close_session_over_http() {
        let (store, router) = test_router();
        let session = store.create_session(Duration::from_secs(5)).unwrap();
        store.put("/test/5", b"x", Some(&session.id)).unwrap();

        let req = Request::builder()
            .method("DELETE")
            .uri(format!("/v1/sessions/{}", session.id))
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(store.get("/test/5").unwrap().is_none());
    }

    #[tokio::test]
    async fn list_by_prefix() {
        let (store, router) = test_router();
        store.put("/a/1", b"x", None).unwrap();
        store.put("/b/1", b"x", None).unwrap();

        let req = Request::builder()
            .uri("/v1/list?prefix=/a/")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        let body: ApiResponse<Vec<StoredEntry>> = body_json(resp).await;
        assert_eq!(body.data.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn healthz_ok() {
        let (_, router) = test_router();
        let req = Request::builder()
            .uri("/healthz")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
