//! Session lease held by a worker.
//!
//! Registrations are written under the session, so they disappear when
//! the lease does. The worker renews the lease from `run_keepalive`; if a
//! renewal finds the lease already gone, the expiry notification fires
//! and the worker must treat its registrations as lost.

use std::sync::Arc;
use std::time::Duration;

use keyroute_store::SessionId;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::CoordinationClient;
use crate::error::ClientError;

pub struct Session {
    client: Arc<dyn CoordinationClient>,
    id: SessionId,
    ttl: Duration,
    expired_tx: watch::Sender<bool>,
}

impl Session {
    /// Open a new lease on the store.
    pub async fn establish(
        client: Arc<dyn CoordinationClient>,
        ttl: Duration,
    ) -> Result<Self, ClientError> {
        let record = client.create_session(ttl).await?;
        let (expired_tx, _) = watch::channel(false);
        info!(session = %record.id, ?ttl, "session established");
        Ok(Self {
            client,
            id: record.id,
            ttl,
            expired_tx,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Flips to `true` once the store reports the lease as gone.
    pub fn expired(&self) -> watch::Receiver<bool> {
        self.expired_tx.subscribe()
    }

    pub fn is_expired(&self) -> bool {
        *self.expired_tx.borrow()
    }

    pub(crate) fn mark_expired(&self) {
        if !self.expired_tx.send_replace(true) {
            warn!(session = %self.id, "session lost; registrations under it are gone");
        }
    }

    /// Renew the lease once.
    pub async fn renew(&self) -> Result<(), ClientError> {
        match self.client.keep_alive(&self.id).await {
            Ok(record) => {
                debug!(session = %self.id, expires_at_ms = record.expires_at_ms, "session renewed");
                Ok(())
            }
            Err(e @ ClientError::SessionExpired(_)) => {
                self.mark_expired();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Renew every `interval` until shutdown or expiry.
    ///
    /// A renewal that fails because the store is unreachable is retried on
    /// the next tick; the lease only lapses if the store stays away longer
    /// than the TTL.
    pub async fn run_keepalive(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(session = %self.id, ?interval, "keepalive loop started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.renew().await {
                        Ok(()) => {}
                        Err(ClientError::SessionExpired(_)) => break,
                        Err(e) => warn!(session = %self.id, error = %e, "keepalive failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!(session = %self.id, "keepalive loop shutting down");
                    break;
                }
            }
        }
    }

    /// End the lease, dropping every entry written under it.
    pub async fn close(&self) -> Result<bool, ClientError> {
        let existed = self.client.close_session(&self.id).await?;
        self.expired_tx.send_replace(true);
        info!(session = %self.id, existed, "session closed");
        Ok(existed)
    }
}
