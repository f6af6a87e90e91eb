//! Periodic reaper loop.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, instrument};

use dbgrid_state::epoch_secs;

use crate::reaper::OrphanReaper;

pub struct ReaperWorker {
    reaper: OrphanReaper,
    interval: Duration,
}

impl ReaperWorker {
    pub fn new(reaper: OrphanReaper, interval: Duration) -> Self {
        Self { reaper, interval }
    }

    /// Sweep every `interval` until `shutdown` flips to `true`.
    ///
    /// The first sweep happens one interval after start.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "starting reaper worker");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reaper.run_once(epoch_secs()).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reaper worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}
