//! keyroute-registry: key → location registration and lookup.
//!
//! A worker that owns a key's state opens a [`Session`] on the
//! coordination store and publishes the key's [`Location`] through a
//! [`LocationRegistry`]. Entries are bound to the session, so a crashed or
//! partitioned worker's registrations vanish once its lease expires.
//! Readers use a [`LocationResolver`], which distinguishes "nothing
//! registered" from "store unreachable".
//!
//! [`Location`]: keyroute_core::Location

pub mod cache;
pub mod client;
pub mod context;
pub mod error;
pub mod registry;
pub mod resolver;
pub mod session;

pub use cache::{CacheConfig, CacheStats, LocationCache};
pub use client::{CoordinationClient, LocalClient};
pub use context::RoutingContext;
pub use error::{ClientError, RegistrationError, ResolutionError};
pub use registry::LocationRegistry;
pub use resolver::LocationResolver;
pub use session::Session;
