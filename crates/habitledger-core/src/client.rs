//! API clients
//!
//! `ApiClient` talks to the server directly. `OfflineClient` wraps it for
//! application call sites: while offline, mutating calls are queued and
//! answered optimistically instead of failing.

use habitledger_api::{Endpoint, Method, MutationKind, MutationPayload, MutationRecord};
use habitledger_transport::{HttpRequest, Transport, TransportError};
use habitledger_util::MutationId;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{ConnectivityMonitor, Credentials, MutationQueue};

/// Status reported on optimistic (queued) results
pub const QUEUED_STATUS: u16 = 202;

/// Errors from API calls
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Session expired, sign in again")]
    Unauthorized,

    #[error("Server rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{method} {path} cannot be queued while offline")]
    UnsupportedOfflineOperation { method: Method, path: String },

    #[error("{kind} needs a target id")]
    MissingTarget { kind: MutationKind },
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Result of an API call
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Option<Value>,
    /// Set when the call was queued for later instead of sent
    pub queued: Option<MutationId>,
}

impl ApiResponse {
    /// Synthetic success for a queued mutation: the original body with
    /// `"queued": true` and the mutation id added. Bodies that are not
    /// objects are kept under `"data"`.
    pub fn optimistic(id: MutationId, body: Option<&Value>) -> Self {
        let mut fields = match body {
            Some(Value::Object(map)) => map.clone(),
            Some(other) => Map::from_iter([("data".to_string(), other.clone())]),
            None => Map::new(),
        };
        fields.insert("queued".into(), Value::Bool(true));
        fields.insert("mutationId".into(), Value::String(id.to_string()));

        Self {
            status: QUEUED_STATUS,
            body: Some(Value::Object(fields)),
            queued: Some(id),
        }
    }

    pub fn is_queued(&self) -> bool {
        self.queued.is_some()
    }
}

/// Reacts to the server rejecting the stored credential
pub trait SessionHandler: Send + Sync {
    /// Called after the credential has been cleared
    fn session_expired(&self);
}

/// Session handler that only logs
pub struct LogSessionHandler;

impl SessionHandler for LogSessionHandler {
    fn session_expired(&self) {
        warn!("Session expired, sign in again");
    }
}

/// Direct API client
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    timeout: Duration,
    session: Arc<dyn SessionHandler>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, credentials: Credentials, timeout: Duration) -> Self {
        Self {
            transport,
            credentials,
            timeout,
            session: Arc::new(LogSessionHandler),
        }
    }

    pub fn with_session_handler(mut self, handler: Arc<dyn SessionHandler>) -> Self {
        self.session = handler;
        self
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Send a call with the stored credential and the request timeout.
    ///
    /// Non-2xx responses become `ApiError::Rejected`. A 401 additionally
    /// clears the credential and notifies the session handler, and is
    /// reported as `ApiError::Unauthorized`.
    pub async fn send(&self, method: Method, path: &str, body: Option<Value>) -> ApiResult<ApiResponse> {
        let request = HttpRequest::new(method, path)
            .with_body(body)
            .with_bearer(self.credentials.token());

        let response = tokio::time::timeout(self.timeout, self.transport.send(request))
            .await
            .map_err(|_| TransportError::Timeout)??;

        if response.status == 401 {
            warn!(method = %method, path = %path, "Credential rejected");
            if let Err(e) = self.credentials.clear() {
                warn!(error = %e, "Failed to clear rejected credential");
            }
            self.session.session_expired();
            return Err(ApiError::Unauthorized);
        }

        if !response.is_success() {
            return Err(ApiError::Rejected {
                status: response.status,
                message: response.error_message(),
            });
        }

        debug!(method = %method, path = %path, status = response.status, "API call succeeded");
        Ok(ApiResponse {
            status: response.status,
            body: response.body,
            queued: None,
        })
    }

    /// Replay a queued mutation with the request its kind calls for
    pub async fn replay(&self, record: &MutationRecord) -> ApiResult<ApiResponse> {
        let endpoint = record
            .kind
            .endpoint(record.payload.target_id.as_deref())
            .ok_or(ApiError::MissingTarget { kind: record.kind })?;

        let body = match record.kind {
            MutationKind::DeleteHabit => None,
            MutationKind::ToggleLog
            | MutationKind::BulkLogs
            | MutationKind::CreateHabit
            | MutationKind::UpdateHabit => record.payload.body.clone(),
        };

        self.send(endpoint.method, &endpoint.path, body).await
    }
}

/// Offline-aware client for application call sites
pub struct OfflineClient {
    api: Arc<ApiClient>,
    monitor: Arc<ConnectivityMonitor>,
    queue: Arc<MutationQueue>,
}

impl OfflineClient {
    pub fn new(
        api: Arc<ApiClient>,
        monitor: Arc<ConnectivityMonitor>,
        queue: Arc<MutationQueue>,
    ) -> Self {
        Self {
            api,
            monitor,
            queue,
        }
    }

    /// Reads always go to the server
    pub async fn get(&self, path: &str) -> ApiResult<ApiResponse> {
        self.api.send(Method::Get, path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> ApiResult<ApiResponse> {
        self.call(Method::Post, path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> ApiResult<ApiResponse> {
        self.call(Method::Put, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> ApiResult<ApiResponse> {
        self.call(Method::Delete, path, None).await
    }

    /// Issue a mutation of a known kind.
    ///
    /// The route comes from `kind`, so nothing is inferred from a URL.
    /// `target_id` is required for update and delete.
    pub async fn mutate(
        &self,
        kind: MutationKind,
        target_id: Option<&str>,
        body: Option<Value>,
    ) -> ApiResult<ApiResponse> {
        let endpoint = kind
            .endpoint(target_id)
            .ok_or(ApiError::MissingTarget { kind })?;

        if self.monitor.is_connected() {
            return self.api.send(endpoint.method, &endpoint.path, body).await;
        }

        let payload = MutationPayload {
            target_id: target_id.map(str::to_string),
            body,
        };
        Ok(self.enqueue(kind, payload, endpoint))
    }

    /// Drop a queued mutation whose optimistic result the caller is
    /// reverting. Returns false if it was already replayed or pruned.
    pub fn discard(&self, id: MutationId) -> bool {
        let removed = self.queue.remove(id);
        if removed {
            info!(mutation_id = %id, "Queued mutation discarded");
        }
        removed
    }

    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> ApiResult<ApiResponse> {
        if self.monitor.is_connected() {
            return self.api.send(method, path, body).await;
        }

        let Some((kind, target_id)) = MutationKind::classify(method, path) else {
            warn!(method = %method, path = %path, "Unsupported offline operation");
            return Err(ApiError::UnsupportedOfflineOperation {
                method,
                path: path.to_string(),
            });
        };

        let payload = MutationPayload { target_id, body };
        Ok(self.enqueue(kind, payload, Endpoint::new(method, path)))
    }

    fn enqueue(&self, kind: MutationKind, payload: MutationPayload, endpoint: Endpoint) -> ApiResponse {
        let body = payload.body.clone();
        let id = self.queue.enqueue(kind, payload, endpoint);
        info!(mutation_id = %id, kind = %kind, "Offline, mutation queued");
        ApiResponse::optimistic(id, body.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use habitledger_config::{ApiSettings, ConnectivitySettings, SyncSettings};
    use habitledger_store::{MemoryStore, Store};
    use habitledger_transport::{MockReply, MockTransport};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        transport: Arc<MockTransport>,
        monitor: Arc<ConnectivityMonitor>,
        queue: Arc<MutationQueue>,
        api: Arc<ApiClient>,
        client: OfflineClient,
    }

    fn fixture(online: bool) -> Fixture {
        let transport = Arc::new(MockTransport::new());
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let monitor = Arc::new(ConnectivityMonitor::new(
            transport.clone(),
            &ApiSettings::default(),
            &ConnectivitySettings::default(),
            online,
        ));
        let queue = Arc::new(MutationQueue::load(
            store.clone(),
            "habit_sync_queue",
            &SyncSettings::default(),
        ));
        let api = Arc::new(ApiClient::new(
            transport.clone(),
            Credentials::new(store, "token"),
            Duration::from_millis(200),
        ));
        let client = OfflineClient::new(api.clone(), monitor.clone(), queue.clone());

        Fixture {
            transport,
            monitor,
            queue,
            api,
            client,
        }
    }

    #[tokio::test]
    async fn offline_post_is_queued_with_optimistic_body() {
        let f = fixture(false);
        let body = json!({"habitId": 42, "date": "2024-03-10", "value": 1});

        let resp = f.client.post("/api/logs/toggle", body.clone()).await.unwrap();
        let id = resp.queued.unwrap();

        let returned = resp.body.unwrap();
        assert_eq!(returned["habitId"], 42);
        assert_eq!(returned["queued"], true);
        assert_eq!(returned["mutationId"], id.to_string());

        let record = f.queue.get(id).unwrap();
        assert_eq!(record.kind, MutationKind::ToggleLog);
        assert_eq!(record.payload.body, Some(body));
        assert_eq!(record.retry_count, 0);
        assert_eq!(f.queue.len(), 1);
        assert!(f.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn offline_array_body_is_kept_in_optimistic_result() {
        let f = fixture(false);
        let logs = json!([{"habitId": 1, "date": "2024-03-10"}, {"habitId": 2, "date": "2024-03-10"}]);

        let resp = f.client.post("/api/logs/bulk", logs.clone()).await.unwrap();
        let id = resp.queued.unwrap();

        let returned = resp.body.unwrap();
        assert_eq!(returned["data"], logs);
        assert_eq!(returned["queued"], true);
        assert_eq!(returned["mutationId"], id.to_string());
        assert_eq!(f.queue.get(id).unwrap().payload.body, Some(logs));
    }

    #[tokio::test]
    async fn offline_put_captures_target_id() {
        let f = fixture(false);
        let resp = f
            .client
            .put("/api/habits/7", json!({"name": "Stretch"}))
            .await
            .unwrap();

        let record = f.queue.get(resp.queued.unwrap()).unwrap();
        assert_eq!(record.kind, MutationKind::UpdateHabit);
        assert_eq!(record.payload.target_id.as_deref(), Some("7"));
        assert_eq!(record.endpoint, Endpoint::new(Method::Put, "/api/habits/7"));
    }

    #[tokio::test]
    async fn offline_unknown_route_is_rejected() {
        let f = fixture(false);
        let err = f.client.post("/api/notes", json!({})).await.unwrap_err();
        assert!(matches!(err, ApiError::UnsupportedOfflineOperation { .. }));
        assert!(f.queue.is_empty());
    }

    #[tokio::test]
    async fn online_calls_pass_through_and_are_not_queued_on_failure() {
        let f = fixture(true);
        f.transport
            .respond(Method::Post, "/api/habits", MockReply::status(500));

        let err = f.client.post("/api/habits", json!({"name": "Run"})).await.unwrap_err();
        assert!(matches!(err, ApiError::Rejected { status: 500, .. }));
        assert!(f.queue.is_empty());

        f.transport.set_offline(true);
        let err = f.client.delete("/api/habits/3").await.unwrap_err();
        assert!(matches!(err, ApiError::Transport(TransportError::Connect(_))));
        assert!(f.queue.is_empty());
    }

    #[tokio::test]
    async fn get_ignores_connectivity() {
        let f = fixture(false);
        f.transport.respond(
            Method::Get,
            "/api/habits",
            MockReply::json(200, json!([{"_id": "1"}])),
        );

        let resp = f.client.get("/api/habits").await.unwrap();
        assert!(!resp.is_queued());
        assert_eq!(resp.body, Some(json!([{"_id": "1"}])));
    }

    #[tokio::test]
    async fn mutate_uses_kind_route() {
        let f = fixture(true);
        f.client
            .mutate(MutationKind::DeleteHabit, Some("9"), None)
            .await
            .unwrap();
        assert_eq!(f.transport.call_count(Method::Delete, "/api/habits/9"), 1);

        let err = f
            .client
            .mutate(MutationKind::UpdateHabit, None, Some(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::MissingTarget { .. }));
    }

    #[tokio::test]
    async fn discard_reverts_queued_mutation() {
        let f = fixture(false);
        let resp = f
            .client
            .mutate(MutationKind::CreateHabit, None, Some(json!({"name": "Read"})))
            .await
            .unwrap();
        let id = resp.queued.unwrap();

        assert!(f.client.discard(id));
        assert!(f.queue.is_empty());
        assert!(!f.client.discard(id));
    }

    #[tokio::test]
    async fn bearer_header_attached() {
        let f = fixture(true);
        f.api.credentials().set_token("secret").unwrap();

        f.client.get("/api/habits").await.unwrap();
        assert_eq!(f.transport.calls()[0].bearer.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn unauthorized_clears_credential_and_notifies() {
        struct Counter(AtomicUsize);
        impl SessionHandler for Counter {
            fn session_expired(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let transport = Arc::new(MockTransport::new());
        transport.respond(Method::Get, "/api/habits", MockReply::status(401));
        let credentials = Credentials::new(Arc::new(MemoryStore::new()), "token");
        credentials.set_token("stale").unwrap();

        let handler = Arc::new(Counter(AtomicUsize::new(0)));
        let api = ApiClient::new(transport, credentials.clone(), Duration::from_secs(1))
            .with_session_handler(handler.clone());

        let err = api.send(Method::Get, "/api/habits", None).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert!(credentials.token().is_none());
        assert_eq!(handler.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let transport = Arc::new(MockTransport::new().with_latency(Duration::from_millis(500)));
        let api = ApiClient::new(
            transport,
            Credentials::new(Arc::new(MemoryStore::new()), "token"),
            Duration::from_millis(50),
        );

        let err = api.send(Method::Post, "/api/logs/toggle", None).await.unwrap_err();
        assert!(matches!(err, ApiError::Transport(TransportError::Timeout)));
    }

    #[tokio::test]
    async fn replay_builds_kind_specific_requests() {
        let f = fixture(true);
        let record = MutationRecord::new(
            MutationKind::DeleteHabit,
            MutationPayload::target("5", Some(json!({"ignored": true}))),
            Endpoint::new(Method::Delete, "/api/habits/5"),
            habitledger_util::now(),
        );

        f.api.replay(&record).await.unwrap();
        let call = &f.transport.calls()[0];
        assert_eq!(call.method, Method::Delete);
        assert_eq!(call.path, "/api/habits/5");
        assert!(call.body.is_none());
        assert!(f.monitor.is_connected());
    }
}
