//! Mock transport for testing

use async_trait::async_trait;
use habitledger_api::Method;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use crate::{HttpRequest, HttpResponse, Transport, TransportError, TransportResult};

/// A scripted outcome for one call
#[derive(Debug, Clone)]
pub enum MockReply {
    Respond(HttpResponse),
    Fail(TransportError),
}

impl MockReply {
    pub fn status(status: u16) -> Self {
        MockReply::Respond(HttpResponse::new(status, None))
    }

    pub fn json(status: u16, body: Value) -> Self {
        MockReply::Respond(HttpResponse::new(status, Some(body)))
    }
}

type RouteKey = (Method, String);

#[derive(Debug, Default)]
struct Script {
    /// One-shot replies, consumed first
    queued: HashMap<RouteKey, VecDeque<MockReply>>,
    /// Reply used once the one-shot replies for a route run out
    standing: HashMap<RouteKey, MockReply>,
}

/// Mock transport for unit/integration testing.
///
/// Unscripted routes answer `200` with an empty body. While `offline` is
/// set every call fails with `TransportError::Connect`, without consuming
/// any scripted reply.
pub struct MockTransport {
    script: Mutex<Script>,
    calls: Arc<Mutex<Vec<HttpRequest>>>,

    /// Simulate a dead network
    pub offline: AtomicBool,

    /// Delay before every reply
    pub latency: Mutex<Option<Duration>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script::default()),
            calls: Arc::new(Mutex::new(Vec::new())),
            offline: AtomicBool::new(false),
            latency: Mutex::new(None),
        }
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().unwrap() = Some(latency);
        self
    }

    /// Answer every call to a route with `reply`
    pub fn respond(&self, method: Method, path: &str, reply: MockReply) {
        self.script
            .lock()
            .unwrap()
            .standing
            .insert((method, path.to_string()), reply);
    }

    /// Answer the next call to a route with `reply`, ahead of the standing reply
    pub fn respond_once(&self, method: Method, path: &str, reply: MockReply) {
        self.script
            .lock()
            .unwrap()
            .queued
            .entry((method, path.to_string()))
            .or_default()
            .push_back(reply);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// All requests seen so far, in order
    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of requests seen for a route
    pub fn call_count(&self, method: Method, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|req| req.method == method && req.path == path)
            .count()
    }

    fn next_reply(&self, method: Method, path: &str) -> MockReply {
        let mut script = self.script.lock().unwrap();
        let key = (method, path.to_string());

        if let Some(queue) = script.queued.get_mut(&key)
            && let Some(reply) = queue.pop_front()
        {
            return reply;
        }

        script
            .standing
            .get(&key)
            .cloned()
            .unwrap_or_else(|| MockReply::status(200))
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> TransportResult<HttpResponse> {
        debug!(method = %request.method, path = %request.path, "Mock request");
        self.calls.lock().unwrap().push(request.clone());

        let latency = *self.latency.lock().unwrap();
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("network unreachable".into()));
        }

        match self.next_reply(request.method, &request.path) {
            MockReply::Respond(response) => Ok(response),
            MockReply::Fail(err) => Err(err),
        }
    }
}
