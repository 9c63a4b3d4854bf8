//! keyroute-store: the coordination store behind key location routing.
//!
//! Backed by [redb](https://docs.rs/redb), it keeps hierarchical entries
//! (`/namespace/key` paths) whose lifetime is bound to a session lease.
//! A session stays live while its owner keeps renewing it; once it
//! expires, every entry it owns stops being visible and is eventually
//! reaped.
//!
//! # Architecture
//!
//! ```text
//! CoordStore
//!   ├── SESSIONS table   session_id → SessionRecord (ttl, expires_at)
//!   ├── ENTRIES table    path → StoredEntry (value, owning session, version)
//!   └── broadcast        StoreEvent (Put / Deleted / SessionExpired)
//! ```
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! The `CoordStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod error;
mod reaper;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use store::CoordStore;
pub use types::*;
