//! Records persisted by the coordination store.

use serde::{Deserialize, Serialize};

/// Unique identifier of a session lease.
pub type SessionId = String;

/// A session lease. Entries bound to it live exactly as long as it does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    /// Lease length granted on every renewal.
    pub ttl_ms: u64,
    /// Unix timestamp (milliseconds) when the session was created.
    pub created_at_ms: u64,
    /// Unix timestamp (milliseconds) after which the lease is void.
    pub expires_at_ms: u64,
}

impl SessionRecord {
    pub fn is_live_at(&self, now_ms: u64) -> bool {
        now_ms <= self.expires_at_ms
    }
}

/// A node in the hierarchical store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub path: String,
    pub value: Vec<u8>,
    /// Owning session; `None` for persistent entries.
    pub session: Option<SessionId>,
    /// Starts at 1 and increments on every overwrite.
    pub version: u64,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

/// Change notification delivered to watchers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    Put { path: String, version: u64 },
    Deleted { path: String },
    SessionExpired { session: SessionId },
}

impl StoreEvent {
    /// Path touched by this event, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            StoreEvent::Put { path, .. } | StoreEvent::Deleted { path } => Some(path),
            StoreEvent::SessionExpired { .. } => None,
        }
    }
}
