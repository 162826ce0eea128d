//! Store trait definitions

use crate::StoreResult;

/// String key-value store.
///
/// Each call is atomic on its own; callers that read-modify-write a value
/// are responsible for serializing those sequences.
pub trait Store: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Delete a value; no-op if absent
    fn remove(&self, key: &str) -> StoreResult<()>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
