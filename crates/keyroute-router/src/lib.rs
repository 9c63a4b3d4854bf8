//! keyroute-router: route point queries to whichever worker owns a key.
//!
//! [`QueryRouter`] resolves the key through a
//! [`LocationResolver`](keyroute_registry::LocationResolver), sends the
//! query over a [`QueryTransport`] with a per-attempt deadline, and on any
//! failure re-resolves and retries until the attempt budget or the
//! overall timeout runs out. Callers always get a value or a typed
//! [`RouterFailure`].

pub mod error;
pub mod router;
pub mod state;
pub mod transport;

pub use error::{FailureCause, FailureDescriptor, FailureReason, QueryError, RouterFailure};
pub use router::{QueryOptions, QueryOutcome, QueryResult, QueryRouter};
pub use state::{AttemptTracker, QueryPhase};
pub use transport::QueryTransport;
