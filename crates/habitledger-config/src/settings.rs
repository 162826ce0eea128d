//! Validated settings structures

use crate::schema::{
    RawApiConfig, RawConfig, RawConnectivityConfig, RawStorageConfig, RawSyncConfig,
};
use habitledger_api::{DEFAULT_MAX_RETRIES, DEFAULT_RETENTION_DAYS, HEALTH_PATH};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://habitledger-server.onrender.com";
pub const DEFAULT_QUEUE_KEY: &str = "habit_sync_queue";
pub const DEFAULT_TOKEN_KEY: &str = "token";

/// Validated settings ready for use by the sync services
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub api: ApiSettings,
    pub connectivity: ConnectivitySettings,
    pub sync: SyncSettings,
    pub storage: StorageSettings,
}

impl Settings {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            api: ApiSettings::from_raw(raw.api),
            connectivity: ConnectivitySettings::from_raw(raw.connectivity),
            sync: SyncSettings::from_raw(raw.sync),
            storage: StorageSettings::from_raw(raw.storage),
        }
    }
}

/// Remote API settings
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub health_path: String,
    pub request_timeout: Duration,
}

impl ApiSettings {
    fn from_raw(raw: RawApiConfig) -> Self {
        let defaults = Self::default();
        Self {
            base_url: raw
                .base_url
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            health_path: raw.health_path.unwrap_or(defaults.health_path),
            request_timeout: raw
                .request_timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            health_path: HEALTH_PATH.to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Connectivity probe settings
#[derive(Debug, Clone)]
pub struct ConnectivitySettings {
    /// Probe interval while offline
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
}

impl ConnectivitySettings {
    fn from_raw(raw: RawConnectivityConfig) -> Self {
        let defaults = Self::default();
        Self {
            probe_interval: raw
                .probe_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.probe_interval),
            probe_timeout: raw
                .probe_timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.probe_timeout),
        }
    }
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Queue and drain settings
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub max_retries: u32,
    pub retention: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Safety-net drain interval while online
    pub periodic_interval: Duration,
    pub status_poll: Duration,
}

impl SyncSettings {
    fn from_raw(raw: RawSyncConfig) -> Self {
        let defaults = Self::default();
        Self {
            max_retries: raw.max_retries.unwrap_or(defaults.max_retries),
            retention: raw
                .retention_days
                .map(days)
                .unwrap_or(defaults.retention),
            backoff_base: raw
                .backoff_base_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_base),
            backoff_max: raw
                .backoff_max_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_max),
            periodic_interval: raw
                .periodic_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.periodic_interval),
            status_poll: raw
                .status_poll_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.status_poll),
        }
    }

    /// Delay before the next drain pass, given the highest retry count
    /// among pending records: `min(base * 2^retries, max)`.
    pub fn backoff_delay(&self, retries: u32) -> Duration {
        let factor = 1u32.checked_shl(retries).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retention: days(DEFAULT_RETENTION_DAYS),
            backoff_base: Duration::from_millis(5000),
            backoff_max: Duration::from_millis(60000),
            periodic_interval: Duration::from_secs(5 * 60),
            status_poll: Duration::from_secs(5),
        }
    }
}

/// Local persistence settings
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    pub queue_key: String,
    pub token_key: String,
}

impl StorageSettings {
    fn from_raw(raw: RawStorageConfig) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: raw.data_dir.unwrap_or(defaults.data_dir),
            queue_key: raw.queue_key.unwrap_or(defaults.queue_key),
            token_key: raw.token_key.unwrap_or(defaults.token_key),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: habitledger_util::data_dir_without_env(),
            queue_key: DEFAULT_QUEUE_KEY.to_string(),
            token_key: DEFAULT_TOKEN_KEY.to_string(),
        }
    }
}

fn days(n: u32) -> Duration {
    Duration::from_secs(u64::from(n) * 24 * 60 * 60)
}
