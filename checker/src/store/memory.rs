//! In-memory record store for tests and dry runs.

use super::{ArtefactRecord, RecordStore, StoreError};
use dist_integrity_common::{ArtefactKey, Namespace};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// A [`RecordStore`] that keeps records in a map and forgets them on drop.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<BTreeMap<ArtefactKey, ArtefactRecord>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryRecordStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose writes always fail, to exercise the fatal path.
    #[cfg(any(test, feature = "test-support"))]
    #[must_use]
    pub fn failing() -> Self {
        let store = Self::default();
        store.fail_writes.store(true, Ordering::SeqCst);
        store
    }

    /// Number of successful `put` calls.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Snapshot every record.
    #[must_use]
    pub fn records(&self) -> Vec<ArtefactRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

impl RecordStore for MemoryRecordStore {
    fn get(&self, key: &ArtefactKey) -> Result<Option<ArtefactRecord>, StoreError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(key).cloned())
    }

    fn put(&self, record: &ArtefactRecord) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "writes disabled".to_owned(),
            });
        }
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.insert(record.key.clone(), record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn keys_in(&self, namespace: &Namespace) -> Result<Vec<ArtefactKey>, StoreError> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .keys()
            .filter(|key| key.namespace() == namespace)
            .cloned()
            .collect())
    }
}
