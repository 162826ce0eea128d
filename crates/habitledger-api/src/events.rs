//! Events published by the connectivity monitor and the sync engine

use habitledger_util::MutationId;
use serde::{Deserialize, Serialize};

/// Connectivity transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

impl ConnectivityEvent {
    pub fn from_connected(connected: bool) -> Self {
        if connected {
            ConnectivityEvent::Online
        } else {
            ConnectivityEvent::Offline
        }
    }
}

/// A single record that failed to replay during a drain pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub mutation_id: MutationId,
    pub error: String,
}

/// Tally of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, mutation_id: MutationId, error: impl Into<String>) {
        self.failed += 1;
        self.errors.push(SyncFailure {
            mutation_id,
            error: error.into(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Lifecycle events emitted by the sync engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A drain pass started with `count` pending records
    Syncing { count: usize },

    /// A drain pass finished with no failures
    Success(SyncReport),

    /// A drain pass finished with some failures
    Partial(SyncReport),

    /// A drain pass was aborted
    Error { message: String },

    /// The queue was cleared on request
    Cleared,
}

impl SyncEvent {
    /// Error text a status indicator should show after this event.
    /// `None` clears any previous error.
    pub fn status_error(&self) -> Option<String> {
        match self {
            SyncEvent::Partial(report) => Some(format!("{} actions failed to sync", report.failed)),
            SyncEvent::Error { message } => Some(message.clone()),
            SyncEvent::Syncing { .. } | SyncEvent::Success(_) | SyncEvent::Cleared => None,
        }
    }
}
