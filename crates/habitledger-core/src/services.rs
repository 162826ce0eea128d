//! Service wiring
//!
//! Builds the monitor, queue, clients, engine, and broadcaster once and hands
//! out shared references, so every consumer sees the same instances.

use habitledger_config::Settings;
use habitledger_store::Store;
use habitledger_transport::Transport;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::{
    ApiClient, ConnectivityMonitor, Credentials, MutationQueue, OfflineClient, SessionHandler,
    StatusBroadcaster, SyncEngine,
};

/// The long-lived sync services of one client
pub struct SyncServices {
    pub monitor: Arc<ConnectivityMonitor>,
    pub queue: Arc<MutationQueue>,
    pub credentials: Credentials,
    pub api: Arc<ApiClient>,
    pub client: Arc<OfflineClient>,
    pub engine: Arc<SyncEngine>,
    pub status: Arc<StatusBroadcaster>,
    store: Arc<dyn Store>,
}

impl SyncServices {
    pub fn new(
        settings: &Settings,
        transport: Arc<dyn Transport>,
        store: Arc<dyn Store>,
        initially_online: bool,
    ) -> Self {
        Self::build(settings, transport, store, initially_online, None)
    }

    pub fn with_session_handler(
        settings: &Settings,
        transport: Arc<dyn Transport>,
        store: Arc<dyn Store>,
        initially_online: bool,
        handler: Arc<dyn SessionHandler>,
    ) -> Self {
        Self::build(settings, transport, store, initially_online, Some(handler))
    }

    fn build(
        settings: &Settings,
        transport: Arc<dyn Transport>,
        store: Arc<dyn Store>,
        initially_online: bool,
        handler: Option<Arc<dyn SessionHandler>>,
    ) -> Self {
        let monitor = Arc::new(ConnectivityMonitor::new(
            transport.clone(),
            &settings.api,
            &settings.connectivity,
            initially_online,
        ));

        let queue = Arc::new(MutationQueue::load(
            store.clone(),
            settings.storage.queue_key.as_str(),
            &settings.sync,
        ));
        // Anything past the retention window is stale on arrival
        queue.prune_expired(habitledger_util::now());

        let credentials = Credentials::new(store.clone(), settings.storage.token_key.as_str());

        let mut api = ApiClient::new(transport, credentials.clone(), settings.api.request_timeout);
        if let Some(handler) = handler {
            api = api.with_session_handler(handler);
        }
        let api = Arc::new(api);

        let client = Arc::new(OfflineClient::new(api.clone(), monitor.clone(), queue.clone()));
        let engine = SyncEngine::new(api.clone(), queue.clone(), monitor.clone(), settings.sync.clone());
        let status = Arc::new(StatusBroadcaster::new(
            monitor.clone(),
            queue.clone(),
            engine.clone(),
            settings.sync.status_poll,
        ));

        Self {
            monitor,
            queue,
            credentials,
            api,
            client,
            engine,
            status,
            store,
        }
    }

    /// Whether the backing store still answers
    pub fn store_healthy(&self) -> bool {
        self.store.is_healthy()
    }

    /// Start the monitor, engine, and broadcaster loops.
    /// They stop once `shutdown` turns true.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let monitor = self.monitor.clone();
        let engine = self.engine.clone();
        let status = self.status.clone();

        let monitor_shutdown = shutdown.clone();
        let engine_shutdown = shutdown.clone();

        info!("Starting sync services");

        vec![
            tokio::spawn(async move { monitor.run(monitor_shutdown).await }),
            tokio::spawn(async move { engine.run(engine_shutdown).await }),
            tokio::spawn(async move { status.run(shutdown).await }),
        ]
    }

    /// Cancel timers owned by the services
    pub fn shutdown(&self) {
        self.engine.shutdown();
    }
}
