//! Caller-facing `QueryState` service.
//!
//! `GET /v1/query/{key}` routes one query and answers with either the
//! value or a failure descriptor. Optional `per_attempt_timeout_ms` and
//! `max_attempts` query parameters override the router policy.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use keyroute_core::{Location, RegistryKey, decode_key};
use keyroute_router::{FailureDescriptor, QueryRouter, QueryTransport, RouterFailure};
use serde::{Deserialize, Serialize};

use crate::response::healthz;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryResponse<V> {
    Ok {
        value: V,
        attempts_used: u32,
        location: Location,
    },
    Failed {
        failure: FailureDescriptor,
    },
    Invalid {
        error: String,
    },
}

#[derive(Debug, Default, Deserialize)]
pub struct QueryParams {
    pub per_attempt_timeout_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}

pub fn query_router<K, V, T>(router: Arc<QueryRouter<K, V, T>>) -> Router
where
    K: RegistryKey,
    V: Serialize + Send + Sync + 'static,
    T: QueryTransport<K, V> + 'static,
{
    Router::new()
        .route("/v1/query/{key}", get(query_key::<K, V, T>))
        .with_state(router)
        .route("/healthz", get(healthz))
}

/// GET /v1/query/{key}
pub async fn query_key<K, V, T>(
    State(router): State<Arc<QueryRouter<K, V, T>>>,
    Path(segment): Path<String>,
    Query(params): Query<QueryParams>,
) -> Response
where
    K: RegistryKey,
    V: Serialize + Send + Sync + 'static,
    T: QueryTransport<K, V> + 'static,
{
    let key: K = match decode_key(&segment) {
        Ok(key) => key,
        Err(e) => {
            let body = QueryResponse::<V>::Invalid {
                error: e.to_string(),
            };
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };

    let policy = router.policy();
    let result = if params.per_attempt_timeout_ms.is_some() || params.max_attempts.is_some() {
        let per_attempt = params
            .per_attempt_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(policy.per_attempt_timeout);
        let attempts = params.max_attempts.unwrap_or(policy.max_attempts);
        router.query_with(&key, per_attempt, attempts).await
    } else {
        router.query(&key).await
    };

    match result {
        Ok(outcome) => Json(QueryResponse::Ok {
            value: outcome.value,
            attempts_used: outcome.attempts,
            location: outcome.location,
        })
        .into_response(),
        Err(failure) => {
            let status = match failure {
                RouterFailure::OverallTimeoutExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::SERVICE_UNAVAILABLE,
            };
            let body = QueryResponse::<V>::Failed {
                failure: failure.descriptor(),
            };
            (status, Json(body)).into_response()
        }
    }
}
