//! HTTP transport trait interfaces for habitledger-sync
//!
//! This crate defines the seam between the sync core and the network. It
//! contains no networking code itself; `habitledger-http` provides the real
//! implementation and `MockTransport` stands in for it in tests.

mod mock;
mod traits;

pub use mock::*;
pub use traits::*;
