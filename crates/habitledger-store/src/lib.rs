//! Persistence layer for habitledger-sync
//!
//! Provides a string key-value store, the local-storage equivalent the
//! offline queue and the credential slot live in:
//! - `SqliteStore` for on-disk persistence
//! - `MemoryStore` for tests, with an optional capacity quota

mod memory;
mod sqlite;
mod traits;

pub use memory::*;
pub use sqlite::*;
pub use traits::*;

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether freeing space might let the same write succeed
    pub fn is_capacity(&self) -> bool {
        matches!(self, StoreError::CapacityExceeded(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DiskFull) | Some(rusqlite::ErrorCode::TooBig) => {
                StoreError::CapacityExceeded(e.to_string())
            }
            _ => StoreError::Database(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
