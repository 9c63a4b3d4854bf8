//! keyroute-api: HTTP surfaces for key location routing.
//!
//! Three axum services and the hyper clients that talk to them:
//!
//! | Service | Routes | Client |
//! |---|---|---|
//! | Coordination store | `/v1/sessions`, `/v1/entries`, `/v1/list` | [`RemoteStoreClient`] |
//! | Worker state | `/v1/state/{key}` | [`HttpTransport`] |
//! | Query | `/v1/query/{key}` | any HTTP client |
//!
//! Every service also answers `GET /healthz`. Keys travel in URL paths as
//! their JSON encoding, percent-escaped.

pub mod http_client;
pub mod query_service;
pub mod remote_store;
pub mod response;
pub mod store_service;
pub mod transport;
pub mod worker_service;

pub use query_service::{QueryResponse, query_router};
pub use remote_store::RemoteStoreClient;
pub use response::ApiResponse;
pub use store_service::store_router;
pub use transport::HttpTransport;
pub use worker_service::{WorkerState, worker_router};
