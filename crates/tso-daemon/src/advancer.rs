//! Background advance task.
//!
//! Drives [`TimestampOracle::advance`] at the configured cadence on a
//! dedicated tokio task. A failed advance is logged and the loop keeps
//! ticking: the oracle retains its previous window (stale but safe), and
//! demotion is the election collaborator's call, not this task's.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::oracle::TimestampOracle;

/// Handle to the running advance task.
#[derive(Debug)]
pub struct Advancer {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Advancer {
    /// Spawns the advance loop at the oracle's `update_step` cadence.
    #[must_use]
    pub fn spawn(oracle: Arc<TimestampOracle>) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let step = oracle.config().update_step;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(step);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = oracle.advance().await {
                            warn!(error = %e, "timestamp advance failed");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("advancer stopped");
        });

        Self { shutdown, handle }
    }

    /// Signals the loop to stop and waits for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}
