//! Offline sync core for habitledger-sync
//!
//! This crate is the heart of the client, containing:
//! - Connectivity monitoring (native signals plus health probes)
//! - The persistent mutation queue
//! - The direct and offline-aware API clients
//! - The sync engine (Idle -> Syncing -> Idle, with backoff retries)
//! - The status broadcaster feeding UI indicators

mod client;
mod connectivity;
mod credentials;
mod engine;
mod queue;
mod services;
mod status;

pub use client::*;
pub use connectivity::*;
pub use credentials::*;
pub use engine::*;
pub use queue::*;
pub use services::*;
pub use status::*;
