//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Remote API settings
    #[serde(default)]
    pub api: RawApiConfig,

    /// Connectivity probing
    #[serde(default)]
    pub connectivity: RawConnectivityConfig,

    /// Queue and drain behavior
    #[serde(default)]
    pub sync: RawSyncConfig,

    /// Local persistence
    #[serde(default)]
    pub storage: RawStorageConfig,
}

/// Remote API settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawApiConfig {
    /// Base URL of the REST API
    pub base_url: Option<String>,

    /// Path probed to decide whether the server is reachable
    pub health_path: Option<String>,

    /// Timeout for a single API call (including replays)
    pub request_timeout_seconds: Option<u64>,
}

/// Connectivity probe settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawConnectivityConfig {
    /// How often to probe while offline
    pub probe_interval_seconds: Option<u64>,

    /// Timeout for a single probe
    pub probe_timeout_seconds: Option<u64>,
}

/// Queue and drain settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSyncConfig {
    /// Failed replays after which a record is dropped
    pub max_retries: Option<u32>,

    /// Age after which a record is dropped regardless of retries
    pub retention_days: Option<u32>,

    /// First backoff delay after a failed pass
    pub backoff_base_ms: Option<u64>,

    /// Backoff ceiling
    pub backoff_max_ms: Option<u64>,

    /// Safety-net drain interval while online
    pub periodic_interval_seconds: Option<u64>,

    /// Defensive status poll interval
    pub status_poll_seconds: Option<u64>,
}

/// Local persistence settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawStorageConfig {
    /// Directory holding the offline database
    pub data_dir: Option<PathBuf>,

    /// Key holding the serialized queue
    pub queue_key: Option<String>,

    /// Key holding the bearer credential
    pub token_key: Option<String>,
}
