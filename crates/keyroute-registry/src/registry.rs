//! Location registry: the write side.
//!
//! Publishes `key → location` under `{namespace_root}/{key}` as an
//! ephemeral entry of the worker's session. Only the owning worker writes.

use std::marker::PhantomData;
use std::sync::Arc;

use keyroute_core::{Location, LocationRecord, NamespaceRoot, RegistryKey};
use tracing::{debug, info, warn};

use crate::client::CoordinationClient;
use crate::error::{ClientError, RegistrationError};
use crate::session::Session;

pub struct LocationRegistry<K> {
    client: Arc<dyn CoordinationClient>,
    namespace: NamespaceRoot,
    session: Arc<Session>,
    _key: PhantomData<fn(&K)>,
}

impl<K: RegistryKey> LocationRegistry<K> {
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        namespace: NamespaceRoot,
        session: Arc<Session>,
    ) -> Self {
        Self {
            client,
            namespace,
            session,
            _key: PhantomData,
        }
    }

    pub fn namespace(&self) -> &NamespaceRoot {
        &self.namespace
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn path_for(&self, key: &K) -> Result<String, RegistrationError> {
        self.namespace
            .entry_path(key)
            .map_err(|e| RegistrationError::InvalidKey(e.to_string()))
    }

    /// Create or replace the registration for `key`.
    ///
    /// Supersedes any previous entry for the key, including one written by
    /// another worker. Returns the entry version.
    pub async fn register(&self, key: &K, location: &Location) -> Result<u64, RegistrationError> {
        if self.session.is_expired() {
            return Err(RegistrationError::SessionExpired(self.session.id().to_string()));
        }
        let path = self.path_for(key)?;
        let record = LocationRecord::new(location.clone());
        let value = serde_json::to_vec(&record).map_err(|e| {
            RegistrationError::Rejected(format!("unencodable location record: {e}"))
        })?;

        match self.client.put(&path, &value, Some(self.session.id())).await {
            Ok(version) => {
                info!(?key, %path, %location, version, "key registered");
                Ok(version)
            }
            Err(e) => {
                if matches!(e, ClientError::SessionExpired(_)) {
                    self.session.mark_expired();
                }
                warn!(?key, %path, error = %e, "registration failed");
                Err(e.into())
            }
        }
    }

    /// Retract the registration for `key`.
    ///
    /// Only removes an entry this session owns; if ownership has moved to
    /// another worker, or nothing is registered, this is a no-op. Returns
    /// whether an entry was removed.
    pub async fn deregister(&self, key: &K) -> Result<bool, RegistrationError> {
        let path = self.path_for(key)?;
        let removed = self.client.delete(&path, Some(self.session.id())).await?;
        if removed {
            info!(?key, %path, "key deregistered");
        } else {
            debug!(?key, %path, "deregister: no entry owned by this session");
        }
        Ok(removed)
    }
}
