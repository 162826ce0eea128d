//! Strongly-typed identifiers for habitledger-sync

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a queued offline mutation.
///
/// Backed by a UUIDv7, so the leading bits are the creation timestamp in
/// milliseconds and the remainder is a counter plus random suffix. Ids
/// created later in the same process always compare greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MutationId(Uuid);

impl MutationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MutationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_id_uniqueness() {
        let a = MutationId::new();
        let b = MutationId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn mutation_ids_order_by_creation() {
        let ids: Vec<MutationId> = (0..64).map(|_| MutationId::new()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn mutation_id_parses_its_display_form() {
        let id = MutationId::new();
        let parsed: MutationId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<MutationId>().is_err());
    }

    #[test]
    fn ids_serialize_deserialize() {
        let id = MutationId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: MutationId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }
}
