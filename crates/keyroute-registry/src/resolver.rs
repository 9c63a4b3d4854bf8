//! Location resolver: the read side.
//!
//! Typed over the key domain; reports a missing registration distinctly
//! from a store that cannot be reached. Each call works on its own path
//! and result, so concurrent lookups for different keys never share
//! anything but the optional cache.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use keyroute_core::{Location, LocationRecord, NamespaceRoot, RegistryKey};
use keyroute_store::StoreEvent;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{CacheConfig, CacheStats, LocationCache};
use crate::client::CoordinationClient;
use crate::error::ResolutionError;

pub struct LocationResolver<K> {
    client: Arc<dyn CoordinationClient>,
    namespace: NamespaceRoot,
    cache: Option<Arc<Mutex<LocationCache>>>,
    _key: PhantomData<fn(&K)>,
}

impl<K> Clone for LocationResolver<K> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            namespace: self.namespace.clone(),
            cache: self.cache.clone(),
            _key: PhantomData,
        }
    }
}

impl<K: RegistryKey> LocationResolver<K> {
    /// Resolver that reads the store on every call.
    pub fn new(client: Arc<dyn CoordinationClient>, namespace: NamespaceRoot) -> Self {
        Self {
            client,
            namespace,
            cache: None,
            _key: PhantomData,
        }
    }

    /// Resolver that keeps resolved locations for a bounded interval.
    pub fn with_cache(
        client: Arc<dyn CoordinationClient>,
        namespace: NamespaceRoot,
        config: CacheConfig,
    ) -> Self {
        Self {
            cache: Some(Arc::new(Mutex::new(LocationCache::new(config)))),
            ..Self::new(client, namespace)
        }
    }

    pub fn namespace(&self) -> &NamespaceRoot {
        &self.namespace
    }

    fn path_for(&self, key: &K) -> Result<String, ResolutionError> {
        self.namespace
            .entry_path(key)
            .map_err(|e| ResolutionError::Malformed(e.to_string()))
    }

    fn lock_cache(cache: &Mutex<LocationCache>) -> MutexGuard<'_, LocationCache> {
        cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current location for `key`, from the cache when one is fresh.
    pub async fn resolve(&self, key: &K) -> Result<Location, ResolutionError> {
        let path = self.path_for(key)?;
        if let Some(cache) = &self.cache {
            if let Some(location) = Self::lock_cache(cache).get(&path) {
                return Ok(location);
            }
        }
        self.read(key, &path).await
    }

    /// Current location for `key`, always read from the store.
    pub async fn resolve_fresh(&self, key: &K) -> Result<Location, ResolutionError> {
        let path = self.path_for(key)?;
        self.read(key, &path).await
    }

    async fn read(&self, key: &K, path: &str) -> Result<Location, ResolutionError> {
        let entry = match self.client.get(path).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!(?key, %path, "no registration");
                if let Some(cache) = &self.cache {
                    Self::lock_cache(cache).remove(path);
                }
                return Err(ResolutionError::NotFound {
                    path: path.to_string(),
                });
            }
            Err(e) => {
                warn!(?key, %path, error = %e, "resolution failed");
                return Err(e.into());
            }
        };

        let record: LocationRecord = serde_json::from_slice(&entry.value).map_err(|e| {
            warn!(?key, %path, error = %e, "registration entry does not hold a location");
            ResolutionError::Malformed(format!("{path}: {e}"))
        })?;

        debug!(?key, %path, location = %record.location, version = entry.version, "resolved");
        if let Some(cache) = &self.cache {
            Self::lock_cache(cache).insert(path, record.location.clone());
        }
        Ok(record.location)
    }

    /// Forget any cached location for `key`.
    pub fn invalidate(&self, key: &K) {
        let Some(cache) = &self.cache else { return };
        if let Ok(path) = self.namespace.entry_path(key) {
            if Self::lock_cache(cache).remove(&path) {
                debug!(?key, %path, "cached location invalidated");
            }
        }
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|c| Self::lock_cache(c).stats())
    }

    /// Start watching store changes, or `None` if the client cannot watch.
    ///
    /// Take the watch before the read it guards: a registration committed
    /// between the read and [`wait_for_registration`](Self::wait_for_registration)
    /// is then still delivered.
    pub fn watch(&self) -> Option<broadcast::Receiver<StoreEvent>> {
        self.client.subscribe()
    }

    /// Wait until `events` reports a change to `key`'s registration or
    /// `deadline` passes.
    ///
    /// Returns true if a change was observed. Without a watch this simply
    /// sleeps until the deadline.
    pub async fn wait_for_registration(
        &self,
        key: &K,
        events: Option<broadcast::Receiver<StoreEvent>>,
        deadline: Instant,
    ) -> bool {
        let Some(mut events) = events else {
            tokio::time::sleep_until(deadline).await;
            return false;
        };
        let Ok(path) = self.namespace.entry_path(key) else {
            tokio::time::sleep_until(deadline).await;
            return false;
        };

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) if event.path() == Some(path.as_str()) => return true,
                    Ok(_) => {}
                    // Missed events may include ours.
                    Err(broadcast::error::RecvError::Lagged(_)) => return true,
                    Err(broadcast::error::RecvError::Closed) => {
                        tokio::time::sleep_until(deadline).await;
                        return false;
                    }
                },
                _ = tokio::time::sleep_until(deadline) => return false,
            }
        }
    }

    /// Drop cached entries as the store reports changes to them.
    ///
    /// Returns `None` when there is no cache or the client cannot watch.
    pub fn spawn_invalidator(&self, mut shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        let cache = self.cache.clone()?;
        let mut events = self.client.subscribe()?;
        let namespace = self.namespace.clone();

        Some(tokio::spawn(async move {
            info!(%namespace, "cache invalidator started");
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => {
                            if let Some(path) = event.path() {
                                if namespace.contains(path) && Self::lock_cache(&cache).remove(path) {
                                    debug!(%path, "cached location dropped on store change");
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "invalidator lagged; clearing location cache");
                            Self::lock_cache(&cache).clear();
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
            info!(%namespace, "cache invalidator stopped");
        }))
    }
}
