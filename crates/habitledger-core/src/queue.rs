//! Persistent mutation queue
//!
//! The queue is held in memory and written through to a single JSON array
//! under one store key after every change. The in-memory list is the source
//! of truth for the running process; a failed write leaves it ahead of the
//! store until the next successful write.

use chrono::{DateTime, Local};
use habitledger_api::{Endpoint, MutationKind, MutationPayload, MutationRecord};
use habitledger_config::SyncSettings;
use habitledger_store::{Store, StoreResult};
use habitledger_util::MutationId;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Durable FIFO of offline mutations
pub struct MutationQueue {
    store: Arc<dyn Store>,
    key: String,
    max_retries: u32,
    retention: Duration,
    records: Mutex<Vec<MutationRecord>>,
}

impl MutationQueue {
    /// Load the queue stored under `key`.
    ///
    /// Missing, unreadable, or corrupt data is logged and treated as an
    /// empty queue.
    pub fn load(store: Arc<dyn Store>, key: impl Into<String>, settings: &SyncSettings) -> Self {
        let key = key.into();

        let records = match store.get(&key) {
            Ok(Some(json)) => match serde_json::from_str::<Vec<MutationRecord>>(&json) {
                Ok(records) => records,
                Err(e) => {
                    warn!(key = %key, error = %e, "Stored queue is corrupt, starting empty");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read stored queue, starting empty");
                Vec::new()
            }
        };

        info!(key = %key, records = records.len(), "Mutation queue loaded");

        Self {
            store,
            key,
            max_retries: settings.max_retries,
            retention: settings.retention,
            records: Mutex::new(records),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Append a new mutation with `retry_count = 0` and `created_at = now`.
    ///
    /// Storage failures are never returned. If the write fails, expired
    /// records and the oldest quarter of the remaining records are pruned
    /// and the write is retried once; if that fails too the new record is
    /// dropped and the queue is left as it was. In that case the returned
    /// id is not in the queue.
    pub fn enqueue(
        &self,
        kind: MutationKind,
        payload: MutationPayload,
        endpoint: Endpoint,
    ) -> MutationId {
        let record = MutationRecord::new(kind, payload, endpoint, habitledger_util::now());
        self.enqueue_record(record)
    }

    /// Append an already built record (same failure policy as `enqueue`)
    pub fn enqueue_record(&self, record: MutationRecord) -> MutationId {
        let id = record.id;
        let kind = record.kind;
        let mut records = self.lock();
        let before = records.clone();

        records.push(record);
        let first_err = match self.persist(&records) {
            Ok(()) => {
                debug!(mutation_id = %id, kind = %kind, queued = records.len(), "Mutation queued");
                return id;
            }
            Err(e) => e,
        };

        warn!(
            mutation_id = %id,
            error = %first_err,
            "Failed to save queue, pruning old entries and retrying"
        );

        let freed = self.free_space(&mut records, habitledger_util::now());
        match self.persist(&records) {
            Ok(()) => {
                info!(mutation_id = %id, kind = %kind, freed, "Mutation queued after pruning");
            }
            Err(e) => {
                warn!(
                    mutation_id = %id,
                    kind = %kind,
                    error = %e,
                    "Failed to save queue after pruning, dropping mutation"
                );
                *records = before;
            }
        }

        id
    }

    /// Records still eligible for replay, in insertion order
    pub fn pending_records(&self) -> Vec<MutationRecord> {
        self.lock()
            .iter()
            .filter(|r| !r.is_exhausted(self.max_retries))
            .cloned()
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|r| !r.is_exhausted(self.max_retries))
            .count()
    }

    /// Highest retry count among pending records
    pub fn max_pending_retries(&self) -> Option<u32> {
        self.lock()
            .iter()
            .filter(|r| !r.is_exhausted(self.max_retries))
            .map(|r| r.retry_count)
            .max()
    }

    /// All records, including exhausted ones not yet pruned
    pub fn records(&self) -> Vec<MutationRecord> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, id: MutationId) -> Option<MutationRecord> {
        self.lock().iter().find(|r| r.id == id).cloned()
    }

    /// Remove a record. Returns false if it was not queued.
    pub fn remove(&self, id: MutationId) -> bool {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|r| r.id != id);

        if records.len() == before {
            return false;
        }
        self.persist_or_warn(&records, "remove");
        true
    }

    /// Count a failed replay. Returns the new retry count, or `None` if the
    /// record is not queued.
    pub fn mark_failed(&self, id: MutationId) -> Option<u32> {
        let mut records = self.lock();
        let record = records.iter_mut().find(|r| r.id == id)?;

        record.retry_count += 1;
        record.last_error_at = Some(habitledger_util::now());
        let retries = record.retry_count;

        self.persist_or_warn(&records, "mark_failed");
        Some(retries)
    }

    /// Drop records created more than the retention window before `now`,
    /// whatever their retry count. Returns how many were dropped.
    pub fn prune_expired(&self, now: DateTime<Local>) -> usize {
        let mut records = self.lock();
        let removed = self.drop_expired(&mut records, now);

        if removed > 0 {
            info!(removed, "Pruned expired mutations");
            self.persist_or_warn(&records, "prune_expired");
        }
        removed
    }

    /// Drop records that have used up their retries. Returns how many were dropped.
    pub fn prune_exhausted(&self) -> usize {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|r| !r.is_exhausted(self.max_retries));
        let removed = before - records.len();

        if removed > 0 {
            info!(removed, max_retries = self.max_retries, "Pruned exhausted mutations");
            self.persist_or_warn(&records, "prune_exhausted");
        }
        removed
    }

    pub fn clear(&self) {
        let mut records = self.lock();
        let removed = records.len();
        records.clear();
        info!(removed, "Mutation queue cleared");
        self.persist_or_warn(&records, "clear");
    }

    fn drop_expired(&self, records: &mut Vec<MutationRecord>, now: DateTime<Local>) -> usize {
        // A window reaching past the representable range expires nothing
        let Some(cutoff) = now.checked_sub_signed(habitledger_util::to_chrono(self.retention))
        else {
            return 0;
        };

        let before = records.len();
        records.retain(|r| !r.is_older_than(cutoff));
        before - records.len()
    }

    /// Make room for the record just pushed onto `records`: drop expired
    /// records, then the oldest quarter (at least one) of what remains
    /// ahead of the new record.
    fn free_space(&self, records: &mut Vec<MutationRecord>, now: DateTime<Local>) -> usize {
        let Some(newest) = records.pop() else {
            return 0;
        };

        let expired = self.drop_expired(records, now);
        let oldest = if records.is_empty() {
            0
        } else {
            (records.len() / 4).max(1)
        };
        records.drain(..oldest);
        records.push(newest);

        expired + oldest
    }

    fn persist(&self, records: &[MutationRecord]) -> StoreResult<()> {
        let json = serde_json::to_string(records)?;
        self.store.set(&self.key, &json)
    }

    fn persist_or_warn(&self, records: &[MutationRecord], op: &'static str) {
        if let Err(e) = self.persist(records) {
            warn!(op, error = %e, "Failed to save mutation queue");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<MutationRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use habitledger_api::Method;
    use habitledger_store::{MemoryStore, SqliteStore};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    const KEY: &str = "habit_sync_queue";

    fn queue_with(store: Arc<dyn Store>) -> MutationQueue {
        MutationQueue::load(store, KEY, &SyncSettings::default())
    }

    fn toggle(queue: &MutationQueue, habit_id: u32) -> MutationId {
        queue.enqueue(
            MutationKind::ToggleLog,
            MutationPayload::body(json!({"habitId": habit_id, "date": "2024-03-10", "value": 1})),
            Endpoint::new(Method::Post, "/api/logs/toggle"),
        )
    }

    #[test]
    fn enqueue_appends_fresh_record() {
        let queue = queue_with(Arc::new(MemoryStore::new()));
        let id = toggle(&queue, 42);

        let record = queue.get(id).unwrap();
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.kind, MutationKind::ToggleLog);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pending_count(), 1);
    }

    #[test]
    fn fifo_order_preserved() {
        let queue = queue_with(Arc::new(MemoryStore::new()));
        let ids: Vec<_> = (0..5).map(|n| toggle(&queue, n)).collect();

        let pending: Vec<_> = queue.pending_records().into_iter().map(|r| r.id).collect();
        assert_eq!(pending, ids);
    }

    #[test]
    fn reload_yields_identical_records() {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
        let queue = queue_with(store.clone());
        toggle(&queue, 1);
        let id = toggle(&queue, 2);
        queue.mark_failed(id);

        let reloaded = queue_with(store);
        assert_eq!(reloaded.records(), queue.records());
    }

    #[test]
    fn corrupt_data_loads_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set(KEY, "{not json").unwrap();

        let queue = queue_with(store);
        assert!(queue.is_empty());
    }

    #[test]
    fn remove_missing_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue_with(store.clone());
        toggle(&queue, 1);
        let writes = store.write_count();

        assert!(!queue.remove(MutationId::new()));
        assert_eq!(queue.len(), 1);
        assert_eq!(store.write_count(), writes);
    }

    #[test]
    fn last_failure_before_limit_excludes_record() {
        let queue = queue_with(Arc::new(MemoryStore::new()));
        let id = toggle(&queue, 1);

        assert_eq!(queue.mark_failed(id), Some(1));
        assert_eq!(queue.mark_failed(id), Some(2));
        assert_eq!(queue.pending_count(), 1);
        assert!(queue.get(id).unwrap().last_error_at.is_some());

        assert_eq!(queue.mark_failed(id), Some(3));
        assert_eq!(queue.pending_count(), 0);
        assert!(queue.pending_records().is_empty());
        // Still stored until pruned
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.prune_exhausted(), 1);
        assert!(queue.get(id).is_none());
    }

    #[test]
    fn prune_exhausted_is_idempotent() {
        let queue = queue_with(Arc::new(MemoryStore::new()));
        let doomed = toggle(&queue, 1);
        toggle(&queue, 2);
        for _ in 0..3 {
            queue.mark_failed(doomed);
        }

        queue.prune_exhausted();
        let once = queue.records();
        assert_eq!(queue.prune_exhausted(), 0);
        assert_eq!(queue.records(), once);
    }

    #[test]
    fn prune_expired_ignores_retry_count() {
        let queue = queue_with(Arc::new(MemoryStore::new()));
        let now = habitledger_util::now();

        let old = MutationRecord::new(
            MutationKind::CreateHabit,
            MutationPayload::body(json!({"name": "Read"})),
            Endpoint::new(Method::Post, "/api/habits"),
            now - chrono::Duration::days(8),
        );
        let old_id = queue.enqueue_record(old);
        let fresh_id = toggle(&queue, 1);

        assert_eq!(queue.prune_expired(now), 1);
        assert!(queue.get(old_id).is_none());
        assert!(queue.get(fresh_id).is_some());
    }

    #[test]
    fn capacity_failure_prunes_oldest_and_retries() {
        let queue_bytes = {
            let probe = queue_with(Arc::new(MemoryStore::new()));
            for n in 0..4 {
                toggle(&probe, n);
            }
            serde_json::to_string(&probe.records()).unwrap().len()
        };
        // Room for four records but not five
        let store = Arc::new(MemoryStore::with_capacity_limit(KEY.len() + queue_bytes + 100));
        let queue = queue_with(store.clone());

        let ids: Vec<_> = (0..4).map(|n| toggle(&queue, n)).collect();
        let newest = toggle(&queue, 99);

        // Oldest quarter of the four older records is one record
        assert_eq!(queue.len(), 4);
        assert!(queue.get(ids[0]).is_none());
        assert!(queue.get(newest).is_some());

        // Memory and store agree
        let reloaded = queue_with(store);
        assert_eq!(reloaded.records(), queue.records());
    }

    #[test]
    fn persistent_failure_drops_new_record() {
        let store = Arc::new(MemoryStore::new());
        let queue = queue_with(store.clone());
        let kept = toggle(&queue, 1);

        store.fail_writes.store(true, Ordering::SeqCst);
        let dropped = toggle(&queue, 2);

        assert!(queue.get(dropped).is_none());
        assert!(queue.get(kept).is_some());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn clear_empties_store() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let queue = queue_with(store.clone());
        toggle(&queue, 1);
        toggle(&queue, 2);

        queue.clear();
        assert!(queue.is_empty());
        assert!(queue_with(store).is_empty());
    }
}
