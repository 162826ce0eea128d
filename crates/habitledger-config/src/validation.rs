//! Configuration validation

use crate::schema::RawConfig;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("api.base_url '{0}' must start with http:// or https://")]
    InvalidBaseUrl(String),

    #[error("api.health_path '{0}' must start with '/'")]
    InvalidHealthPath(String),

    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },

    #[error("sync.backoff_base_ms ({base}) exceeds sync.backoff_max_ms ({max})")]
    BackoffRange { base: u64, max: u64 },

    #[error("storage.{field} cannot be empty")]
    EmptyKey { field: &'static str },

    #[error("storage.queue_key and storage.token_key must differ")]
    KeyCollision,
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(url) = &config.api.base_url
        && !(url.starts_with("http://") || url.starts_with("https://"))
    {
        errors.push(ValidationError::InvalidBaseUrl(url.clone()));
    }

    if let Some(path) = &config.api.health_path
        && !path.starts_with('/')
    {
        errors.push(ValidationError::InvalidHealthPath(path.clone()));
    }

    let positive: [(&'static str, Option<u64>); 7] = [
        ("api.request_timeout_seconds", config.api.request_timeout_seconds),
        ("connectivity.probe_interval_seconds", config.connectivity.probe_interval_seconds),
        ("connectivity.probe_timeout_seconds", config.connectivity.probe_timeout_seconds),
        ("sync.backoff_base_ms", config.sync.backoff_base_ms),
        ("sync.periodic_interval_seconds", config.sync.periodic_interval_seconds),
        ("sync.status_poll_seconds", config.sync.status_poll_seconds),
        ("sync.max_retries", config.sync.max_retries.map(u64::from)),
    ];
    for (field, value) in positive {
        if value == Some(0) {
            errors.push(ValidationError::ZeroValue { field });
        }
    }

    if config.sync.retention_days == Some(0) {
        errors.push(ValidationError::ZeroValue {
            field: "sync.retention_days",
        });
    }

    if let (Some(base), Some(max)) = (config.sync.backoff_base_ms, config.sync.backoff_max_ms)
        && base > max
    {
        errors.push(ValidationError::BackoffRange { base, max });
    }

    if config.storage.queue_key.as_deref() == Some("") {
        errors.push(ValidationError::EmptyKey { field: "queue_key" });
    }
    if config.storage.token_key.as_deref() == Some("") {
        errors.push(ValidationError::EmptyKey { field: "token_key" });
    }
    if config.storage.queue_key.is_some() && config.storage.queue_key == config.storage.token_key {
        errors.push(ValidationError::KeyCollision);
    }

    errors
}
