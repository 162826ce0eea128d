//! Connectivity monitoring
//!
//! Tracks whether the API is reachable. Status comes from two sources:
//! - Native platform signals, reported through `report_native_status`
//! - Health probes (`HEAD <health_path>`), run periodically while offline

use habitledger_api::ConnectivityEvent;
use habitledger_config::{ApiSettings, ConnectivitySettings};
use habitledger_transport::{HttpRequest, Transport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Connectivity monitor that tracks API reachability
pub struct ConnectivityMonitor {
    transport: Arc<dyn Transport>,
    health_path: String,
    probe_interval: Duration,
    probe_timeout: Duration,
    online: AtomicBool,
    event_tx: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityMonitor {
    /// Create a monitor with an initial status.
    ///
    /// `initially_online` plays the role of the platform's own notion of
    /// connectivity at startup; probes correct it later.
    pub fn new(
        transport: Arc<dyn Transport>,
        api: &ApiSettings,
        connectivity: &ConnectivitySettings,
        initially_online: bool,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            transport,
            health_path: api.health_path.clone(),
            probe_interval: connectivity.probe_interval,
            probe_timeout: connectivity.probe_timeout,
            online: AtomicBool::new(initially_online),
            event_tx,
        }
    }

    /// Last known status
    pub fn is_connected(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Receive a `ConnectivityEvent` on every transition.
    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.event_tx.subscribe()
    }

    /// Report a native online/offline signal.
    ///
    /// Returns true if this changed the status. Repeated reports of the
    /// current status are ignored.
    pub fn report_native_status(&self, online: bool) -> bool {
        self.set_status(online, "native")
    }

    /// Probe the health endpoint and update status from the result.
    ///
    /// A success response while offline flips to online. A probe that gets
    /// no response at all (timeout, refused, DNS) while online flips to
    /// offline. A reachable server answering with an error status leaves
    /// the status alone. Never fails; returns the resulting status.
    pub async fn check_connectivity(&self) -> bool {
        let probe = self.transport.send(HttpRequest::head(self.health_path.as_str()));

        match tokio::time::timeout(self.probe_timeout, probe).await {
            Ok(Ok(response)) if response.is_success() => {
                debug!(status = response.status, "Health probe succeeded");
                self.set_status(true, "probe");
            }
            Ok(Ok(response)) => {
                debug!(status = response.status, "Health probe answered with error status");
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Health probe failed");
                self.set_status(false, "probe");
            }
            Err(_) => {
                debug!(timeout_ms = self.probe_timeout.as_millis() as u64, "Health probe timed out");
                self.set_status(false, "probe");
            }
        }

        self.is_connected()
    }

    /// Probe every `probe_interval` while offline (runs until shutdown)
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.probe_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it so startup does not probe twice
        interval.tick().await;

        info!(
            interval_secs = self.probe_interval.as_secs(),
            "Connectivity monitor started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !self.is_connected() {
                        self.check_connectivity().await;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Connectivity monitor shutting down");
                        break;
                    }
                }
            }
        }
    }

    fn set_status(&self, online: bool, source: &'static str) -> bool {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return false;
        }

        info!(online, source, "Connectivity status changed");
        // No subscribers is fine
        let _ = self.event_tx.send(ConnectivityEvent::from_connected(online));
        true
    }
}
