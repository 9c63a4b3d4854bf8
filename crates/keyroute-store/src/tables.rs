//! redb table definitions for the coordination store.
//!
//! Both tables use `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Session leases keyed by session ID.
pub const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Entries keyed by their absolute path (`/namespace/key`).
pub const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");
