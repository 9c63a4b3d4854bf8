//! Background removal of expired sessions.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::store::CoordStore;

impl CoordStore {
    /// Reap expired sessions every `interval` until shutdown.
    ///
    /// Reads already hide entries of lapsed sessions; reaping frees the
    /// space and notifies watchers.
    pub async fn run_reaper(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(?interval, "session reaper started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.reap_expired() {
                        Ok(reaped) if reaped.is_empty() => {}
                        Ok(reaped) => debug!(count = reaped.len(), "expired sessions reaped"),
                        Err(e) => warn!(error = %e, "session reap failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("session reaper shutting down");
                    break;
                }
            }
        }
    }
}
