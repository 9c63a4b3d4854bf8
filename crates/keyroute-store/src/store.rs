//! CoordStore: redb-backed coordination store.
//!
//! Provides session leases and path-addressed entries. An entry written
//! under a session is only visible while that session is live: reads
//! check the owning lease, and `reap_expired` removes dead sessions and
//! their entries for good. Writes to one path are serialized by redb's
//! single write transaction, so at most one entry exists per path.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Capacity of the watch channel; slow watchers see `Lagged` past this.
const EVENT_CAPACITY: usize = 1024;

/// Thread-safe coordination store backed by redb.
#[derive(Clone)]
pub struct CoordStore {
    db: Arc<Database>,
    events: broadcast::Sender<StoreEvent>,
    session_seq: Arc<AtomicU64>,
}

impl CoordStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db)?;
        debug!(?path, "coordination store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing and single-process use).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db)?;
        debug!("in-memory coordination store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> StoreResult<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let store = Self {
            db: Arc::new(db),
            events,
            session_seq: Arc::new(AtomicU64::new(0)),
        };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SESSIONS).map_err(map_err!(Table))?;
        txn.open_table(ENTRIES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Subscribe to change notifications for every path.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: StoreEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    // ── Sessions ───────────────────────────────────────────────────

    /// Start a new session lease lasting `ttl` from now.
    pub fn create_session(&self, ttl: Duration) -> StoreResult<SessionRecord> {
        let now = epoch_millis();
        let ttl_ms = ttl.as_millis() as u64;
        let record = SessionRecord {
            id: self.next_session_id(now),
            ttl_ms,
            created_at_ms: now,
            expires_at_ms: now + ttl_ms,
        };
        let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
            table
                .insert(record.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        info!(session = %record.id, ttl_ms, "session created");
        Ok(record)
    }

    /// Renew a session lease for another `ttl`.
    ///
    /// Fails with `SessionExpired` if the session is unknown or its lease
    /// already ran out; an expired session cannot be revived.
    pub fn keep_alive(&self, session_id: &str) -> StoreResult<SessionRecord> {
        let now = epoch_millis();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record;
        {
            let mut table = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
            let existing = table
                .get(session_id)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            let mut session: SessionRecord = match existing {
                Some(bytes) => serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?,
                None => return Err(StoreError::SessionExpired(session_id.to_string())),
            };
            if !session.is_live_at(now) {
                return Err(StoreError::SessionExpired(session_id.to_string()));
            }
            session.expires_at_ms = now + session.ttl_ms;
            let value = serde_json::to_vec(&session).map_err(map_err!(Serialize))?;
            table
                .insert(session_id, value.as_slice())
                .map_err(map_err!(Write))?;
            record = session;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(session = %session_id, expires_at_ms = record.expires_at_ms, "session renewed");
        Ok(record)
    }

    /// Get a session record, live or not.
    pub fn get_session(&self, session_id: &str) -> StoreResult<Option<SessionRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
        match table.get(session_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: SessionRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// End a session gracefully, removing every entry it owns.
    ///
    /// Returns true if the session existed.
    pub fn close_session(&self, session_id: &str) -> StoreResult<bool> {
        let (existed, removed) = self.remove_session(session_id)?;
        if existed {
            info!(session = %session_id, entries = removed.len(), "session closed");
        }
        for path in removed {
            self.emit(StoreEvent::Deleted { path });
        }
        Ok(existed)
    }

    /// Force a session to expire now, as if its owner stopped renewing.
    ///
    /// Returns true if the session existed.
    pub fn expire_session(&self, session_id: &str) -> StoreResult<bool> {
        let (existed, removed) = self.remove_session(session_id)?;
        if existed {
            warn!(session = %session_id, entries = removed.len(), "session expired");
            self.emit(StoreEvent::SessionExpired {
                session: session_id.to_string(),
            });
        }
        for path in removed {
            self.emit(StoreEvent::Deleted { path });
        }
        Ok(existed)
    }

    /// Remove every session whose lease ran out, with its entries.
    ///
    /// Returns the IDs of the reaped sessions.
    pub fn reap_expired(&self) -> StoreResult<Vec<SessionId>> {
        let now = epoch_millis();
        let expired: Vec<SessionId> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
            let mut ids = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let record: SessionRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if !record.is_live_at(now) {
                    ids.push(record.id);
                }
            }
            ids
        };

        for id in &expired {
            self.expire_session(id)?;
        }
        Ok(expired)
    }

    /// Delete a session and the entries it owns in one transaction.
    fn remove_session(&self, session_id: &str) -> StoreResult<(bool, Vec<String>)> {
        let owned = self.paths_owned_by(session_id)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        let mut removed = Vec::new();
        {
            let mut sessions = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
            existed = sessions.remove(session_id).map_err(map_err!(Write))?.is_some();

            let mut entries = txn.open_table(ENTRIES).map_err(map_err!(Table))?;
            for path in owned {
                // Re-check ownership inside the write transaction; the entry
                // may have been superseded by another session since the scan.
                let current = entries
                    .get(path.as_str())
                    .map_err(map_err!(Read))?
                    .map(|guard| guard.value().to_vec());
                let Some(bytes) = current else { continue };
                let entry: StoredEntry =
                    serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
                if entry.session.as_deref() == Some(session_id) {
                    entries.remove(path.as_str()).map_err(map_err!(Write))?;
                    removed.push(path);
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok((existed, removed))
    }

    fn paths_owned_by(&self, session_id: &str) -> StoreResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ENTRIES).map_err(map_err!(Table))?;
        let mut paths = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let stored: StoredEntry =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if stored.session.as_deref() == Some(session_id) {
                paths.push(key.value().to_string());
            }
        }
        Ok(paths)
    }

    fn next_session_id(&self, now_ms: u64) -> SessionId {
        use std::hash::{Hash, Hasher};
        let seq = self.session_seq.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        now_ms.hash(&mut hasher);
        nanos.hash(&mut hasher);
        seq.hash(&mut hasher);
        format!("session-{:016x}-{seq}", hasher.finish())
    }

    // ── Entries ────────────────────────────────────────────────────

    /// Create or replace the entry at `path`.
    ///
    /// With `session`, the entry is bound to that lease and the write fails
    /// with `SessionExpired` unless the lease is live. Replacing an entry
    /// owned by another session transfers ownership to the writer.
    /// Returns the new version.
    pub fn put(&self, path: &str, value: &[u8], session: Option<&str>) -> StoreResult<u64> {
        let now = epoch_millis();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let version;
        {
            if let Some(session_id) = session {
                let sessions = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
                let live = match sessions.get(session_id).map_err(map_err!(Read))? {
                    Some(guard) => {
                        let record: SessionRecord = serde_json::from_slice(guard.value())
                            .map_err(map_err!(Deserialize))?;
                        record.is_live_at(now)
                    }
                    None => false,
                };
                if !live {
                    return Err(StoreError::SessionExpired(session_id.to_string()));
                }
            }

            let mut entries = txn.open_table(ENTRIES).map_err(map_err!(Table))?;
            let previous = entries
                .get(path)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            let previous: Option<StoredEntry> = previous
                .map(|bytes| serde_json::from_slice(&bytes))
                .transpose()
                .map_err(map_err!(Deserialize))?;

            let (created_at_ms, prev_version) = match &previous {
                Some(p) => (p.created_at_ms, p.version),
                None => (now, 0),
            };
            let entry = StoredEntry {
                path: path.to_string(),
                value: value.to_vec(),
                session: session.map(str::to_string),
                version: prev_version + 1,
                created_at_ms,
                updated_at_ms: now,
            };
            let bytes = serde_json::to_vec(&entry).map_err(map_err!(Serialize))?;
            entries
                .insert(path, bytes.as_slice())
                .map_err(map_err!(Write))?;
            version = entry.version;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%path, version, session = ?session, "entry stored");
        self.emit(StoreEvent::Put {
            path: path.to_string(),
            version,
        });
        Ok(version)
    }

    /// Read the entry at `path`.
    ///
    /// An entry whose owning session is gone or expired reads as absent.
    pub fn get(&self, path: &str) -> StoreResult<Option<StoredEntry>> {
        let now = epoch_millis();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let entries = txn.open_table(ENTRIES).map_err(map_err!(Table))?;
        let entry: StoredEntry = match entries.get(path).map_err(map_err!(Read))? {
            Some(guard) => serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
            None => return Ok(None),
        };

        let Some(session_id) = entry.session.as_deref() else {
            return Ok(Some(entry));
        };
        let sessions = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
        let live = match sessions.get(session_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: SessionRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                record.is_live_at(now)
            }
            None => false,
        };
        if live {
            Ok(Some(entry))
        } else {
            debug!(%path, session = %session_id, "entry hidden: owning session expired");
            Ok(None)
        }
    }

    /// List live entries whose path starts with `prefix`.
    pub fn list(&self, prefix: &str) -> StoreResult<Vec<StoredEntry>> {
        let now = epoch_millis();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let entries = txn.open_table(ENTRIES).map_err(map_err!(Table))?;
        let sessions = txn.open_table(SESSIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for item in entries.iter().map_err(map_err!(Read))? {
            let (key, value) = item.map_err(map_err!(Read))?;
            if !key.value().starts_with(prefix) {
                continue;
            }
            let entry: StoredEntry =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            let live = match entry.session.as_deref() {
                None => true,
                Some(id) => match sessions.get(id).map_err(map_err!(Read))? {
                    Some(guard) => {
                        let record: SessionRecord = serde_json::from_slice(guard.value())
                            .map_err(map_err!(Deserialize))?;
                        record.is_live_at(now)
                    }
                    None => false,
                },
            };
            if live {
                results.push(entry);
            }
        }
        Ok(results)
    }

    /// Delete the entry at `path`.
    ///
    /// With `owner`, the entry is only removed if that session owns it, so
    /// a previous owner cannot retract a registration that has moved on.
    /// Returns true if an entry was removed.
    pub fn delete(&self, path: &str, owner: Option<&str>) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed;
        {
            let mut entries = txn.open_table(ENTRIES).map_err(map_err!(Table))?;
            let current = entries
                .get(path)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            removed = match current {
                None => false,
                Some(bytes) => {
                    let entry: StoredEntry =
                        serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
                    let allowed = match owner {
                        None => true,
                        Some(session_id) => entry.session.as_deref() == Some(session_id),
                    };
                    if allowed {
                        entries.remove(path).map_err(map_err!(Write))?;
                    }
                    allowed
                }
            };
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%path, removed, owner = ?owner, "entry delete");
        if removed {
            self.emit(StoreEvent::Deleted {
                path: path.to_string(),
            });
        }
        Ok(removed)
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> CoordStore {
        CoordStore::open_in_memory().unwrap()
    }

    const TTL: Duration = Duration::from_secs(30);

    #[test]
    fn session_create_and_renew() {
        let store = test_store();
        let session = store.create_session(TTL).unwrap();
        assert!(session.id.starts_with("session-"));
        assert_eq!(session.ttl_ms, 30_000);

        let renewed = store.keep_alive(&session.id).unwrap();
        assert!(renewed.expires_at_ms >= session.expires_at_ms);
    }

    #[test]
    fn session_ids_are_unique() {
        let store = test_store();
        let a = store.create_session(TTL).unwrap();
        let b = store.create_session(TTL).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn keep_alive_unknown_session_fails() {
        let store = test_store();
        let err = store.keep_alive("session-missing").unwrap_err();
        assert!(matches!(err, StoreError::SessionExpired(_)));
    }

    #[test]
    fn keep_alive_after_expiry_fails() {
        let store = test_store();
        let session = store.create_session(Duration::from_millis(10)).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        let err = store.keep_alive(&session.id).unwrap_err();
        assert!(matches!(err, StoreError::SessionExpired(_)));
    }

    #[test]
    fn put_and_get_entry() {
        let store = test_store();
        let session = store.create_session(TTL).unwrap();
        let v = store.put("/test/5", b"worker-a", Some(&session.id)).unwrap();
        assert_eq!(v, 1);

        let entry = store.get("/test/5").unwrap().unwrap();
        assert_eq!(entry.value, b"worker-a");
        assert_eq!(entry.session.as_deref(), Some(session.id.as_str()));
        assert_eq!(entry.version, 1);
    }

    #[test]
    fn put_overwrites_and_bumps_version() {
        let store = test_store();
        let session = store.create_session(TTL).unwrap();
        store.put("/test/5", b"worker-a", Some(&session.id)).unwrap();
        let v = store.put("/test/5", b"worker-b", Some(&session.id)).unwrap();
        assert_eq!(v, 2);

        let entry = store.get("/test/5").unwrap().unwrap();
        assert_eq!(entry.value, b"worker-b");
        assert_eq!(store.list("/test/").unwrap().len(), 1);
    }

    #[test]
    fn put_with_dead_session_is_rejected() {
        let store = test_store();
        let err = store.put("/test/5", b"x", Some("session-missing")).unwrap_err();
        assert!(matches!(err, StoreError::SessionExpired(_)));
        assert!(store.get("/test/5").unwrap().is_none());
    }

    #[test]
    fn persistent_entry_survives_without_session() {
        let store = test_store();
        store.put("/config/root", b"{}", None).unwrap();
        let entry = store.get("/config/root").unwrap().unwrap();
        assert!(entry.session.is_none());
    }

    #[test]
    fn get_missing_returns_none() {
        let store = test_store();
        assert!(store.get("/test/404").unwrap().is_none());
    }

    #[test]
    fn entry_hidden_once_session_lapses() {
        let store = test_store();
        let session = store.create_session(Duration::from_millis(10)).unwrap();
        store.put("/test/5", b"worker-a", Some(&session.id)).unwrap();
        std::thread::sleep(Duration::from_millis(30));

        // Not reaped yet, but no longer visible.
        assert!(store.get("/test/5").unwrap().is_none());
        assert!(store.list("/test/").unwrap().is_empty());
    }

    #[test]
    fn reap_removes_expired_sessions_and_entries() {
        let store = test_store();
        let short = store.create_session(Duration::from_millis(10)).unwrap();
        let long = store.create_session(TTL).unwrap();
        store.put("/test/1", b"a", Some(&short.id)).unwrap();
        store.put("/test/2", b"b", Some(&long.id)).unwrap();
        std::thread::sleep(Duration::from_millis(30));

        let reaped = store.reap_expired().unwrap();
        assert_eq!(reaped, vec![short.id.clone()]);
        assert!(store.get_session(&short.id).unwrap().is_none());
        assert!(store.get("/test/2").unwrap().is_some());
    }

    #[test]
    fn close_session_removes_owned_entries_only() {
        let store = test_store();
        let a = store.create_session(TTL).unwrap();
        let b = store.create_session(TTL).unwrap();
        store.put("/test/1", b"a", Some(&a.id)).unwrap();
        store.put("/test/2", b"b", Some(&b.id)).unwrap();

        assert!(store.close_session(&a.id).unwrap());
        assert!(store.get("/test/1").unwrap().is_none());
        assert!(store.get("/test/2").unwrap().is_some());
        assert!(!store.close_session(&a.id).unwrap());
    }

    #[test]
    fn superseded_entry_survives_previous_owner_expiry() {
        let store = test_store();
        let old = store.create_session(TTL).unwrap();
        let new = store.create_session(TTL).unwrap();
        store.put("/test/5", b"worker-a", Some(&old.id)).unwrap();
        store.put("/test/5", b"worker-b", Some(&new.id)).unwrap();

        store.expire_session(&old.id).unwrap();
        let entry = store.get("/test/5").unwrap().unwrap();
        assert_eq!(entry.value, b"worker-b");
    }

    #[test]
    fn delete_respects_owner() {
        let store = test_store();
        let old = store.create_session(TTL).unwrap();
        let new = store.create_session(TTL).unwrap();
        store.put("/test/5", b"worker-b", Some(&new.id)).unwrap();

        assert!(!store.delete("/test/5", Some(&old.id)).unwrap());
        assert!(store.get("/test/5").unwrap().is_some());

        assert!(store.delete("/test/5", Some(&new.id)).unwrap());
        assert!(store.get("/test/5").unwrap().is_none());
        assert!(!store.delete("/test/5", None).unwrap());
    }

    #[test]
    fn list_filters_by_prefix() {
        let store = test_store();
        let s = store.create_session(TTL).unwrap();
        store.put("/a/1", b"x", Some(&s.id)).unwrap();
        store.put("/a/2", b"x", Some(&s.id)).unwrap();
        store.put("/b/1", b"x", Some(&s.id)).unwrap();
        assert_eq!(store.list("/a/").unwrap().len(), 2);
        assert_eq!(store.list("/").unwrap().len(), 3);
    }

    #[test]
    fn watchers_see_put_delete_and_expiry() {
        let store = test_store();
        let mut events = store.subscribe();
        let s = store.create_session(TTL).unwrap();

        store.put("/test/5", b"a", Some(&s.id)).unwrap();
        store.expire_session(&s.id).unwrap();

        assert_eq!(
            events.try_recv().unwrap(),
            StoreEvent::Put {
                path: "/test/5".into(),
                version: 1
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            StoreEvent::SessionExpired {
                session: s.id.clone()
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            StoreEvent::Deleted {
                path: "/test/5".into()
            }
        );
    }

    #[test]
    fn on_disk_store_persists_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coord.redb");
        {
            let store = CoordStore::open(&path).unwrap();
            store.put("/config/root", b"persisted", None).unwrap();
        }
        let store = CoordStore::open(&path).unwrap();
        let entry = store.get("/config/root").unwrap().unwrap();
        assert_eq!(entry.value, b"persisted");
    }
}
