//! Sync engine
//!
//! Drains the mutation queue while online. One drain pass runs at a time;
//! overlapping triggers return `SyncOutcome::AlreadySyncing` without
//! touching the queue.

use chrono::{DateTime, Local};
use habitledger_api::{ConnectivityEvent, SyncEvent, SyncReport};
use habitledger_config::SyncSettings;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{ApiClient, ConnectivityMonitor, MutationQueue};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Message of the `Error` event when connectivity drops mid-pass
pub const CONNECTION_LOST_MESSAGE: &str = "Connection lost during sync";

/// What started a drain pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Automatic,
    Manual,
    Reconnect,
    Periodic,
    Backoff,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncTrigger::Automatic => "automatic",
            SyncTrigger::Manual => "manual",
            SyncTrigger::Reconnect => "reconnect",
            SyncTrigger::Periodic => "periodic",
            SyncTrigger::Backoff => "backoff",
        };
        f.write_str(name)
    }
}

/// Result of asking for a drain pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another pass is running
    AlreadySyncing,
    Offline,
    NothingToSync,
    /// Every pending record was attempted
    Completed(SyncReport),
    /// The pass stopped early
    Aborted { message: String },
}

#[derive(Debug, Default)]
struct EngineState {
    last_error: Option<String>,
    last_sync_time: Option<DateTime<Local>>,
}

/// Clears the syncing flag when a pass ends, however it ends
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The sync engine
pub struct SyncEngine {
    api: Arc<ApiClient>,
    queue: Arc<MutationQueue>,
    monitor: Arc<ConnectivityMonitor>,
    settings: SyncSettings,
    syncing: AtomicBool,
    state: Mutex<EngineState>,
    retry_timer: Mutex<Option<JoinHandle<()>>>,
    event_tx: broadcast::Sender<SyncEvent>,
    weak_self: Weak<SyncEngine>,
}

impl SyncEngine {
    pub fn new(
        api: Arc<ApiClient>,
        queue: Arc<MutationQueue>,
        monitor: Arc<ConnectivityMonitor>,
        settings: SyncSettings,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        info!(
            max_retries = settings.max_retries,
            pending = queue.pending_count(),
            "Sync engine initialized"
        );

        Arc::new_cyclic(|weak_self| Self {
            api,
            queue,
            monitor,
            settings,
            syncing: AtomicBool::new(false),
            state: Mutex::new(EngineState::default()),
            retry_timer: Mutex::new(None),
            event_tx,
            weak_self: weak_self.clone(),
        })
    }

    /// Receive lifecycle events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Error text from the most recent event, if it left one
    pub fn last_error(&self) -> Option<String> {
        self.state().last_error.clone()
    }

    /// When the last pass finished without failures
    pub fn last_sync_time(&self) -> Option<DateTime<Local>> {
        self.state().last_sync_time
    }

    pub fn queue(&self) -> &Arc<MutationQueue> {
        &self.queue
    }

    /// Whether a backoff retry is waiting to fire
    pub fn retry_scheduled(&self) -> bool {
        self.timer()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Run a drain pass
    pub async fn sync(&self) -> SyncOutcome {
        self.sync_triggered(SyncTrigger::Automatic).await
    }

    /// Run a drain pass on user request
    pub async fn manual_sync(&self) -> SyncOutcome {
        info!("Manual sync triggered");
        self.sync_triggered(SyncTrigger::Manual).await
    }

    pub async fn sync_triggered(&self, trigger: SyncTrigger) -> SyncOutcome {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(trigger = %trigger, "Sync already in progress");
            return SyncOutcome::AlreadySyncing;
        }
        let guard = PassGuard(&self.syncing);

        if !self.monitor.is_connected() {
            debug!(trigger = %trigger, "Cannot sync while offline");
            return SyncOutcome::Offline;
        }

        let pending = self.queue.pending_records();
        if pending.is_empty() {
            debug!(trigger = %trigger, "No pending mutations to sync");
            return SyncOutcome::NothingToSync;
        }

        info!(trigger = %trigger, count = pending.len(), "Sync started");
        self.publish(SyncEvent::Syncing {
            count: pending.len(),
        });

        let mut report = SyncReport::default();
        let mut aborted = false;

        for record in &pending {
            if !self.monitor.is_connected() {
                aborted = true;
                break;
            }

            match self.api.replay(record).await {
                Ok(_) => {
                    self.queue.remove(record.id);
                    report.record_success();
                    debug!(mutation_id = %record.id, kind = %record.kind, "Mutation synced");
                }
                Err(e) => {
                    let retries = self.queue.mark_failed(record.id);
                    warn!(
                        mutation_id = %record.id,
                        kind = %record.kind,
                        retries = retries.unwrap_or(record.retry_count),
                        error = %e,
                        "Failed to sync mutation"
                    );
                    report.record_failure(record.id, e.to_string());
                }
            }
        }

        self.queue.prune_exhausted();
        drop(guard);

        if aborted {
            warn!(
                succeeded = report.succeeded,
                failed = report.failed,
                "Connectivity lost, sync aborted"
            );
            self.publish(SyncEvent::Error {
                message: CONNECTION_LOST_MESSAGE.to_string(),
            });
            self.schedule_retry();
            return SyncOutcome::Aborted {
                message: CONNECTION_LOST_MESSAGE.to_string(),
            };
        }

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "Sync finished"
        );

        if report.is_clean() {
            self.publish(SyncEvent::Success(report.clone()));
        } else {
            self.publish(SyncEvent::Partial(report.clone()));
            self.schedule_retry();
        }

        SyncOutcome::Completed(report)
    }

    /// Empty the queue without contacting the server
    pub fn clear_queue(&self) {
        self.cancel_retry();
        self.queue.clear();
        self.publish(SyncEvent::Cleared);
    }

    /// Drain on reconnect and periodically while online (runs until shutdown)
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut connectivity = self.monitor.subscribe();

        let period = self.settings.periodic_interval;
        let mut periodic = tokio::time::interval_at(Instant::now() + period, period);
        periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(periodic_secs = period.as_secs(), "Sync engine running");

        loop {
            tokio::select! {
                event = connectivity.recv() => match event {
                    Ok(ConnectivityEvent::Online) => {
                        info!("Network restored, starting sync");
                        self.sync_triggered(SyncTrigger::Reconnect).await;
                    }
                    Ok(ConnectivityEvent::Offline) => {
                        debug!("Network lost, sync paused");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed connectivity events");
                        if self.monitor.is_connected() {
                            self.sync_triggered(SyncTrigger::Reconnect).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = periodic.tick() => {
                    if self.monitor.is_connected() && !self.queue.is_empty() {
                        self.sync_triggered(SyncTrigger::Periodic).await;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Sync engine shutting down");
                        break;
                    }
                }
            }
        }

        self.shutdown();
    }

    /// Cancel any pending backoff retry
    pub fn shutdown(&self) {
        self.cancel_retry();
    }

    /// Retry after `min(base * 2^worst, max)`, where `worst` is the highest
    /// retry count among pending records. Replaces any earlier timer.
    fn schedule_retry(&self) {
        let Some(worst) = self.queue.max_pending_retries() else {
            debug!("Nothing left to retry");
            return;
        };

        let delay = self.settings.backoff_delay(worst);
        info!(delay_ms = delay.as_millis() as u64, worst_retries = worst, "Scheduling sync retry");

        let weak = self.weak_self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(engine) = weak.upgrade() {
                // This timer has fired; a pass that fails again schedules a new one
                engine.timer().take();
                engine.sync_triggered(SyncTrigger::Backoff).await;
            }
        });

        if let Some(previous) = self.timer().replace(handle) {
            previous.abort();
        }
    }

    fn cancel_retry(&self) {
        if let Some(handle) = self.timer().take() {
            handle.abort();
            debug!("Sync retry cancelled");
        }
    }

    fn publish(&self, event: SyncEvent) {
        {
            let mut state = self.state();
            state.last_error = event.status_error();
            if matches!(event, SyncEvent::Success(_)) {
                state.last_sync_time = Some(habitledger_util::now());
            }
        }
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.retry_timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.cancel_retry();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Credentials;
    use habitledger_api::{Endpoint, Method, MutationKind, MutationPayload};
    use habitledger_config::{ApiSettings, ConnectivitySettings};
    use habitledger_store::{MemoryStore, Store};
    use habitledger_transport::{MockReply, MockTransport};
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        transport: Arc<MockTransport>,
        monitor: Arc<ConnectivityMonitor>,
        queue: Arc<MutationQueue>,
        engine: Arc<SyncEngine>,
    }

    fn settings() -> SyncSettings {
        SyncSettings {
            backoff_base: Duration::from_millis(20),
            backoff_max: Duration::from_millis(200),
            periodic_interval: Duration::from_secs(3600),
            ..SyncSettings::default()
        }
    }

    fn fixture(transport: MockTransport, online: bool) -> Fixture {
        fixture_with(transport, online, settings())
    }

    fn fixture_with(transport: MockTransport, online: bool, settings: SyncSettings) -> Fixture {
        let transport = Arc::new(transport);
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let monitor = Arc::new(ConnectivityMonitor::new(
            transport.clone(),
            &ApiSettings::default(),
            &ConnectivitySettings::default(),
            online,
        ));
        let queue = Arc::new(MutationQueue::load(store.clone(), "habit_sync_queue", &settings));
        let api = Arc::new(ApiClient::new(
            transport.clone(),
            Credentials::new(store, "token"),
            Duration::from_secs(1),
        ));
        let engine = SyncEngine::new(api, queue.clone(), monitor.clone(), settings);

        Fixture {
            transport,
            monitor,
            queue,
            engine,
        }
    }

    fn toggle(queue: &MutationQueue, habit_id: u32) {
        queue.enqueue(
            MutationKind::ToggleLog,
            MutationPayload::body(json!({"habitId": habit_id, "date": "2024-03-10", "value": 1})),
            Endpoint::new(Method::Post, "/api/logs/toggle"),
        );
    }

    fn update(queue: &MutationQueue, id: &str) {
        queue.enqueue(
            MutationKind::UpdateHabit,
            MutationPayload::target(id, Some(json!({"name": "Renamed"}))),
            Endpoint::new(Method::Put, format!("/api/habits/{}", id)),
        );
    }

    #[tokio::test]
    async fn early_outcomes() {
        let f = fixture(MockTransport::new(), false);
        toggle(&f.queue, 1);
        assert_eq!(f.engine.sync().await, SyncOutcome::Offline);

        let f = fixture(MockTransport::new(), true);
        assert_eq!(f.engine.sync().await, SyncOutcome::NothingToSync);
        assert!(f.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn successful_pass_empties_queue() {
        let f = fixture(MockTransport::new(), true);
        let mut events = f.engine.subscribe();
        toggle(&f.queue, 1);
        toggle(&f.queue, 2);

        let outcome = f.engine.manual_sync().await;
        let SyncOutcome::Completed(report) = outcome else {
            panic!("unexpected outcome: {outcome:?}");
        };
        assert_eq!(report.succeeded, 2);
        assert!(f.queue.is_empty());
        assert!(!f.engine.is_syncing());
        assert!(f.engine.last_sync_time().is_some());
        assert!(f.engine.last_error().is_none());

        assert_eq!(events.recv().await.unwrap(), SyncEvent::Syncing { count: 2 });
        assert!(matches!(events.recv().await.unwrap(), SyncEvent::Success(_)));
    }

    #[tokio::test]
    async fn partial_pass_records_failures_and_schedules_retry() {
        let transport = MockTransport::new();
        transport.respond(Method::Put, "/api/habits/7", MockReply::status(500));
        let f = fixture(transport, true);
        let mut events = f.engine.subscribe();
        toggle(&f.queue, 1);
        update(&f.queue, "7");

        let SyncOutcome::Completed(report) = f.engine.sync().await else {
            panic!("pass did not complete");
        };
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(f.queue.len(), 1);
        assert_eq!(f.queue.records()[0].retry_count, 1);
        assert_eq!(f.engine.last_error().as_deref(), Some("1 actions failed to sync"));
        assert!(f.engine.retry_scheduled());

        events.recv().await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), SyncEvent::Partial(_)));
        f.engine.shutdown();
    }

    #[tokio::test]
    async fn backoff_retry_fires_and_reaches_exhaustion() {
        let transport = MockTransport::new();
        transport.respond(Method::Put, "/api/habits/7", MockReply::status(500));
        let f = fixture(transport, true);
        update(&f.queue, "7");

        f.engine.sync().await;

        // Retries at 40ms then 80ms; the third failure exhausts and prunes the record
        tokio::time::timeout(Duration::from_secs(3), async {
            while !f.queue.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("record was never pruned");

        assert_eq!(f.transport.call_count(Method::Put, "/api/habits/7"), 3);
        assert!(!f.engine.retry_scheduled());
    }

    #[tokio::test]
    async fn overlapping_triggers_replay_once() {
        let f = fixture(MockTransport::new().with_latency(Duration::from_millis(50)), true);
        toggle(&f.queue, 1);
        toggle(&f.queue, 2);

        let (first, second) = tokio::join!(f.engine.sync(), f.engine.manual_sync());

        assert!(matches!(first, SyncOutcome::Completed(_)));
        assert_eq!(second, SyncOutcome::AlreadySyncing);
        assert_eq!(f.transport.call_count(Method::Post, "/api/logs/toggle"), 2);
    }

    #[tokio::test]
    async fn connectivity_loss_aborts_pass() {
        let f = fixture(MockTransport::new().with_latency(Duration::from_millis(50)), true);
        toggle(&f.queue, 1);
        toggle(&f.queue, 2);

        // Goes offline while the first replay is in flight
        let monitor = f.monitor.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            monitor.report_native_status(false);
        });

        let outcome = f.engine.sync().await;

        assert_eq!(
            outcome,
            SyncOutcome::Aborted {
                message: CONNECTION_LOST_MESSAGE.into()
            }
        );
        assert_eq!(f.transport.call_count(Method::Post, "/api/logs/toggle"), 1);
        assert_eq!(f.queue.len(), 1);
        assert_eq!(f.engine.last_error().as_deref(), Some(CONNECTION_LOST_MESSAGE));
        f.engine.shutdown();
    }

    #[tokio::test]
    async fn clear_queue_emits_cleared() {
        let f = fixture(MockTransport::new(), false);
        let mut events = f.engine.subscribe();
        toggle(&f.queue, 1);
        toggle(&f.queue, 2);

        f.engine.clear_queue();

        assert_eq!(f.queue.pending_count(), 0);
        assert_eq!(events.recv().await.unwrap(), SyncEvent::Cleared);
        assert!(f.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn run_drains_on_reconnect() {
        let f = fixture(MockTransport::new(), false);
        let mut events = f.engine.subscribe();
        toggle(&f.queue, 42);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = {
            let engine = f.engine.clone();
            tokio::spawn(async move { engine.run(shutdown_rx).await })
        };
        // Let the run loop subscribe before the transition
        tokio::time::sleep(Duration::from_millis(20)).await;

        f.monitor.report_native_status(true);

        let done = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let SyncEvent::Success(report) = events.recv().await.unwrap() {
                    return report;
                }
            }
        })
        .await
        .expect("no sync after reconnect");
        assert_eq!(done.succeeded, 1);
        assert_eq!(f.queue.pending_count(), 0);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn run_drains_periodically_while_online() {
        let f = fixture_with(
            MockTransport::new(),
            true,
            SyncSettings {
                periodic_interval: Duration::from_millis(100),
                ..settings()
            },
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = {
            let engine = f.engine.clone();
            tokio::spawn(async move { engine.run(shutdown_rx).await })
        };

        // Already online, so no connectivity event will announce this one
        update(&f.queue, "9");

        tokio::time::timeout(Duration::from_secs(2), async {
            while !f.queue.is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("periodic drain never ran");
        assert_eq!(f.transport.call_count(Method::Put, "/api/habits/9"), 1);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
