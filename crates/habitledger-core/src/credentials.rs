//! Bearer credential slot

use habitledger_store::{Store, StoreResult};
use std::sync::Arc;
use tracing::{info, warn};

/// The stored bearer token. Obtaining it is the login flow's job; the sync
/// core only reads, replaces, and clears it.
#[derive(Clone)]
pub struct Credentials {
    store: Arc<dyn Store>,
    key: String,
}

impl Credentials {
    pub fn new(store: Arc<dyn Store>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Current token, if any. Read failures are logged and treated as absent.
    pub fn token(&self) -> Option<String> {
        match self.store.get(&self.key) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, "Failed to read credential");
                None
            }
        }
    }

    pub fn set_token(&self, token: &str) -> StoreResult<()> {
        self.store.set(&self.key, token)?;
        info!("Credential stored");
        Ok(())
    }

    pub fn clear(&self) -> StoreResult<()> {
        self.store.remove(&self.key)?;
        info!("Credential cleared");
        Ok(())
    }
}
