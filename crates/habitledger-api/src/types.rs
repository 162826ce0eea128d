//! Shared types for the offline queue and status surface

use chrono::{DateTime, Local};
use habitledger_util::MutationId;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Endpoint, MutationKind};

/// Data needed to replay a mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationPayload {
    /// Target entity id for id-carrying routes (update/delete habit)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,

    /// Request body as sent by the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl MutationPayload {
    pub fn body(body: serde_json::Value) -> Self {
        Self {
            target_id: None,
            body: Some(body),
        }
    }

    pub fn target(target_id: impl Into<String>, body: Option<serde_json::Value>) -> Self {
        Self {
            target_id: Some(target_id.into()),
            body,
        }
    }
}

/// A single queued offline mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub id: MutationId,
    pub kind: MutationKind,
    pub payload: MutationPayload,
    /// Endpoint of the original call
    pub endpoint: Endpoint,
    pub created_at: DateTime<Local>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_error_at: Option<DateTime<Local>>,
}

impl MutationRecord {
    pub fn new(
        kind: MutationKind,
        payload: MutationPayload,
        endpoint: Endpoint,
        created_at: DateTime<Local>,
    ) -> Self {
        Self {
            id: MutationId::new(),
            kind,
            payload,
            endpoint,
            created_at,
            retry_count: 0,
            last_error_at: None,
        }
    }

    /// Whether this record has used up its replay attempts
    pub fn is_exhausted(&self, max_retries: u32) -> bool {
        self.retry_count >= max_retries
    }

    /// Whether this record was created before `cutoff`
    pub fn is_older_than(&self, cutoff: DateTime<Local>) -> bool {
        self.created_at < cutoff
    }
}

/// Aggregated sync status for UI indicators
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_syncing: bool,
    pub pending_count: usize,
    pub sync_error: Option<String>,
    pub last_sync_time: Option<DateTime<Local>>,
}

impl SyncStatus {
    /// The single state a status badge should show
    pub fn indicator(&self) -> StatusIndicator {
        if !self.is_online {
            StatusIndicator::Offline
        } else if self.is_syncing {
            StatusIndicator::Syncing
        } else if self.sync_error.is_some() {
            StatusIndicator::Error
        } else if self.pending_count > 0 {
            StatusIndicator::Pending(self.pending_count)
        } else {
            StatusIndicator::Online
        }
    }
}

/// User-visible sync indicator state, highest priority first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "pending", rename_all = "snake_case")]
pub enum StatusIndicator {
    Offline,
    Syncing,
    Error,
    Pending(usize),
    Online,
}

impl fmt::Display for StatusIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusIndicator::Offline => f.write_str("Offline"),
            StatusIndicator::Syncing => f.write_str("Syncing..."),
            StatusIndicator::Error => f.write_str("Sync Error"),
            StatusIndicator::Pending(n) => write!(f, "Pending ({})", n),
            StatusIndicator::Online => f.write_str("Online"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Method;
    use serde_json::json;

    fn toggle_record() -> MutationRecord {
        MutationRecord::new(
            MutationKind::ToggleLog,
            MutationPayload::body(json!({"habitId": 42, "date": "2024-03-10", "value": 1})),
            Endpoint::new(Method::Post, "/api/logs/toggle"),
            habitledger_util::now(),
        )
    }

    #[test]
    fn new_record_starts_fresh() {
        let record = toggle_record();
        assert_eq!(record.retry_count, 0);
        assert!(record.last_error_at.is_none());
        assert!(!record.is_exhausted(3));
    }

    #[test]
    fn record_serialization() {
        let record = toggle_record();
        let json = serde_json::to_string(&record).unwrap();
        let parsed: MutationRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
        assert!(!json.contains("target_id"));
    }

    #[test]
    fn indicator_priority() {
        let mut status = SyncStatus {
            is_online: false,
            is_syncing: true,
            pending_count: 2,
            sync_error: Some("boom".into()),
            last_sync_time: None,
        };
        assert_eq!(status.indicator(), StatusIndicator::Offline);

        status.is_online = true;
        assert_eq!(status.indicator(), StatusIndicator::Syncing);

        status.is_syncing = false;
        assert_eq!(status.indicator(), StatusIndicator::Error);

        status.sync_error = None;
        assert_eq!(status.indicator(), StatusIndicator::Pending(2));

        status.pending_count = 0;
        assert_eq!(status.indicator(), StatusIndicator::Online);
    }

    #[test]
    fn status_uses_client_field_names() {
        let json = serde_json::to_value(SyncStatus::default()).unwrap();
        assert!(json.get("isOnline").is_some());
        assert!(json.get("pendingCount").is_some());
        assert!(json.get("syncError").is_some());
        assert!(json.get("lastSyncTime").is_some());
    }
}
