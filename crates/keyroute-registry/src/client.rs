//! Coordination store client seam.
//!
//! Everything above this trait (sessions, registry, resolver) is written
//! against `dyn CoordinationClient`, so the same code runs over the
//! in-process store and over the HTTP store service.

use std::time::Duration;

use async_trait::async_trait;
use keyroute_store::{CoordStore, SessionRecord, StoreEvent, StoredEntry};
use tokio::sync::broadcast;

use crate::error::ClientError;

/// Session-oriented client to a hierarchical key/value store.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Open a lease that lasts `ttl` unless renewed.
    async fn create_session(&self, ttl: Duration) -> Result<SessionRecord, ClientError>;

    /// Renew a lease. Fails with `SessionExpired` once it has lapsed.
    async fn keep_alive(&self, session: &str) -> Result<SessionRecord, ClientError>;

    /// End a lease and drop every entry it owns.
    async fn close_session(&self, session: &str) -> Result<bool, ClientError>;

    /// Create or replace the entry at `path`, bound to `session` if given.
    async fn put(
        &self,
        path: &str,
        value: &[u8],
        session: Option<&str>,
    ) -> Result<u64, ClientError>;

    /// Read a live entry.
    async fn get(&self, path: &str) -> Result<Option<StoredEntry>, ClientError>;

    /// Delete an entry; with `owner`, only if that session owns it.
    async fn delete(&self, path: &str, owner: Option<&str>) -> Result<bool, ClientError>;

    /// Change notifications, for clients that support watches.
    fn subscribe(&self) -> Option<broadcast::Receiver<StoreEvent>> {
        None
    }
}

/// In-process client over a [`CoordStore`].
#[derive(Clone)]
pub struct LocalClient {
    store: CoordStore,
}

impl LocalClient {
    pub fn new(store: CoordStore) -> Self {
        Self { store }
    }

    /// Client over a fresh in-memory store.
    pub fn in_memory() -> Result<Self, ClientError> {
        Ok(Self::new(CoordStore::open_in_memory()?))
    }

    pub fn store(&self) -> &CoordStore {
        &self.store
    }
}

#[async_trait]
impl CoordinationClient for LocalClient {
    async fn create_session(&self, ttl: Duration) -> Result<SessionRecord, ClientError> {
        Ok(self.store.create_session(ttl)?)
    }

    async fn keep_alive(&self, session: &str) -> Result<SessionRecord, ClientError> {
        Ok(self.store.keep_alive(session)?)
    }

    async fn close_session(&self, session: &str) -> Result<bool, ClientError> {
        Ok(self.store.close_session(session)?)
    }

    async fn put(
        &self,
        path: &str,
        value: &[u8],
        session: Option<&str>,
    ) -> Result<u64, ClientError> {
        Ok(self.store.put(path, value, session)?)
    }

    async fn get(&self, path: &str) -> Result<Option<StoredEntry>, ClientError> {
        Ok(self.store.get(path)?)
    }

    async fn delete(&self, path: &str, owner: Option<&str>) -> Result<bool, ClientError> {
        Ok(self.store.delete(path, owner)?)
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StoreEvent>> {
        Some(self.store.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_client_round_trips_through_store() {
        let client = LocalClient::in_memory().unwrap();
        let session = client.create_session(Duration::from_secs(5)).await.unwrap();

        client.put("/t/1", b"loc", Some(&session.id)).await.unwrap();
        let entry = client.get("/t/1").await.unwrap().unwrap();
        assert_eq!(entry.value, b"loc");

        assert!(client.delete("/t/1", Some(&session.id)).await.unwrap());
        assert!(client.get("/t/1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn local_client_reports_session_expiry() {
        let client = LocalClient::in_memory().unwrap();
        let err = client.keep_alive("session-gone").await.unwrap_err();
        assert!(matches!(err, ClientError::SessionExpired(_)));
    }

    #[tokio::test]
    async fn local_client_supports_watch() {
        let client = LocalClient::in_memory().unwrap();
        let mut events = client.subscribe().unwrap();
        client.put("/t/1", b"x", None).await.unwrap();
        assert_eq!(events.recv().await.unwrap().path(), Some("/t/1"));
    }
}
