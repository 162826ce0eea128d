//! Status broadcaster
//!
//! Folds the monitor, queue, and engine into one `SyncStatus` and publishes
//! it on a watch channel whenever it changes.

use habitledger_api::SyncStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::{ConnectivityMonitor, MutationQueue, SyncEngine, SyncOutcome};

/// Aggregated, observable sync status
pub struct StatusBroadcaster {
    monitor: Arc<ConnectivityMonitor>,
    queue: Arc<MutationQueue>,
    engine: Arc<SyncEngine>,
    poll_interval: Duration,
    tx: watch::Sender<SyncStatus>,
}

impl StatusBroadcaster {
    pub fn new(
        monitor: Arc<ConnectivityMonitor>,
        queue: Arc<MutationQueue>,
        engine: Arc<SyncEngine>,
        poll_interval: Duration,
    ) -> Self {
        let initial = compute(&monitor, &queue, &engine);
        let (tx, _) = watch::channel(initial);

        Self {
            monitor,
            queue,
            engine,
            poll_interval,
            tx,
        }
    }

    /// Receive the latest status and every change after it.
    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }

    /// Current status, freshly computed
    pub fn current(&self) -> SyncStatus {
        self.refresh()
    }

    /// Recompute the status and publish it if it changed
    pub fn refresh(&self) -> SyncStatus {
        let status = compute(&self.monitor, &self.queue, &self.engine);

        self.tx.send_if_modified(|published| {
            if *published == status {
                return false;
            }
            debug!(indicator = %status.indicator(), pending = status.pending_count, "Sync status changed");
            *published = status.clone();
            true
        });

        status
    }

    /// User-triggered sync
    pub async fn manual_sync(&self) -> SyncOutcome {
        let outcome = self.engine.manual_sync().await;
        self.refresh();
        outcome
    }

    /// User-triggered queue reset; needs no network
    pub fn clear_queue(&self) {
        self.engine.clear_queue();
        self.refresh();
    }

    /// Refresh on every connectivity and sync event, and on a poll
    /// interval as a fallback (runs until shutdown)
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut connectivity = self.monitor.subscribe();
        let mut sync_events = self.engine.subscribe();

        let mut poll = tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(poll_secs = self.poll_interval.as_secs(), "Status broadcaster running");
        self.refresh();

        loop {
            tokio::select! {
                event = connectivity.recv() => {
                    if matches!(event, Err(broadcast::error::RecvError::Closed)) {
                        break;
                    }
                    self.refresh();
                }
                event = sync_events.recv() => {
                    if matches!(event, Err(broadcast::error::RecvError::Closed)) {
                        break;
                    }
                    self.refresh();
                }
                _ = poll.tick() => {
                    self.refresh();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Status broadcaster shutting down");
                        break;
                    }
                }
            }
        }
    }
}

fn compute(monitor: &ConnectivityMonitor, queue: &MutationQueue, engine: &SyncEngine) -> SyncStatus {
    SyncStatus {
        is_online: monitor.is_connected(),
        is_syncing: engine.is_syncing(),
        pending_count: queue.pending_count(),
        sync_error: engine.last_error(),
        last_sync_time: engine.last_sync_time(),
    }
}
