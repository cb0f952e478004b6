//! Periodic cleanup of expired local state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::bruteforce::BruteForceGuard;
use crate::store::CounterStore;

/// Handle to a running sweeper. Dropping it leaves the task running; call
/// [`Sweeper::shutdown`] to stop it.
pub struct Sweeper {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Sweep `store` and `guard` every `interval` until shut down.
    pub fn spawn(store: Arc<dyn CounterStore>, guard: Arc<BruteForceGuard>, interval: Duration) -> Self {
        let (stop, mut stopped) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let counters = store.sweep().await;
                        let records = guard.sweep();
                        if counters + records > 0 {
                            debug!(counters = counters, records = records, "Swept expired state");
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
        });

        info!(interval_secs = interval.as_secs(), "Sweeper started");
        Self { stop, handle }
    }

    /// Stop the sweeper and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
        info!("Sweeper stopped");
    }
}
