//! The collaborator that carries a keyed query to a worker.

use std::sync::Arc;

use async_trait::async_trait;
use keyroute_core::{Location, RegistryKey};

use crate::error::QueryError;

/// Sends a keyed state query to a location.
///
/// The router applies the per-attempt deadline around `send`; an
/// implementation does not need its own timeout, but may fail faster.
#[async_trait]
pub trait QueryTransport<K: RegistryKey, V: Send>: Send + Sync {
    async fn send(&self, location: &Location, key: &K) -> Result<V, QueryError>;
}

#[async_trait]
impl<K, V, T> QueryTransport<K, V> for Arc<T>
where
    K: RegistryKey,
    V: Send,
    T: QueryTransport<K, V> + ?Sized,
{
    async fn send(&self, location: &Location, key: &K) -> Result<V, QueryError> {
        (**self).send(location, key).await
    }
}
