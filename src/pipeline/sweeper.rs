//! Periodic TTL eviction for the behavior caches.
//!
//! A sweeper runs on its own timer, independent of lookup traffic. Sweeps go
//! through the cache's own per-key locking, so they never race a concurrent
//! mutation of the same entry.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// A cache with TTL-based eviction.
pub trait Sweepable: Send + Sync {
    fn name(&self) -> &'static str;

    /// Evict expired entries, returning how many were removed.
    fn sweep(&self) -> usize;
}

/// Handle to a running sweep task.
pub struct CacheSweeper {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl CacheSweeper {
    /// Start sweeping `cache` every `interval`.
    pub fn spawn<S>(cache: Arc<S>, interval: Duration) -> Self
    where
        S: Sweepable + 'static,
    {
        let name = cache.name();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_sweeper(cache, interval, shutdown_rx));
        info!("Started {} sweeper every {:?}", name, interval);

        Self {
            name,
            shutdown_tx,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the sweep loop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!("{} sweeper exited abnormally: {}", self.name, e);
        }
        info!("Stopped {} sweeper", self.name);
    }
}

async fn run_sweeper<S>(cache: Arc<S>, interval: Duration, mut shutdown_rx: watch::Receiver<bool>)
where
    S: Sweepable + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let evicted = cache.sweep();
                if evicted > 0 {
                    debug!("{} sweep evicted {} entries", cache.name(), evicted);
                }
            },
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}
