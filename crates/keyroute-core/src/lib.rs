//! keyroute-core: shared data model for key location routing.
//!
//! Holds the types every other keyroute crate agrees on: the namespace
//! root that scopes registrations, the opaque [`Location`] of a worker,
//! the record stored per registered key, the [`RetryPolicy`] driving the
//! query router, and the `keyroute.toml` configuration.

pub mod config;
pub mod duration;
pub mod error;
pub mod policy;
pub mod types;

pub use config::RoutingConfig;
pub use duration::{format_duration, parse_duration};
pub use error::{ConfigError, KeyEncodingError};
pub use policy::{Backoff, RetryPolicy};
pub use types::*;
