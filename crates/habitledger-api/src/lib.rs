//! Shared types for habitledger-sync
//!
//! This crate defines the vocabulary every other crate speaks:
//! - Mutation records and the fixed REST route table
//! - Connectivity and sync lifecycle events
//! - The UI-facing sync status

mod events;
mod routes;
mod types;

pub use events::*;
pub use routes::*;
pub use types::*;

/// Default number of failed replays after which a record is dropped
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default retention window for queued records, in days
pub const DEFAULT_RETENTION_DAYS: u32 = 7;
