//! Unbounded in-memory record store.

use quiver_core::{CacheKey, QuiverError, QuiverResult, Record, StorageError};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::store::{RecordSource, RecordStore, StoreStats};

/// In-memory record store backed by a `HashMap` behind an `RwLock`.
///
/// A merge holds the write lock for the whole batch, so readers never see
/// a partially merged batch.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<CacheKey, Record>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryRecordStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> QuiverResult<usize> {
        let records = self
            .records
            .read()
            .map_err(|_| QuiverError::Storage(StorageError::LockPoisoned))?;
        Ok(records.len())
    }

    pub fn is_empty(&self) -> QuiverResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl RecordStore for MemoryRecordStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(&self, key: &CacheKey) -> QuiverResult<Option<Record>> {
        let records = self
            .records
            .read()
            .map_err(|_| QuiverError::Storage(StorageError::LockPoisoned))?;
        let record = records.get(key).cloned();
        if record.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(record)
    }

    fn merge(&self, incoming: Vec<Record>) -> QuiverResult<BTreeSet<String>> {
        let mut records = self
            .records
            .write()
            .map_err(|_| QuiverError::Storage(StorageError::LockPoisoned))?;
        let mut changed = BTreeSet::new();
        for record in incoming {
            match records.get_mut(record.key()) {
                Some(existing) => changed.extend(existing.merge(record)),
                None => {
                    changed.extend(record.dependent_keys());
                    records.insert(record.key().clone(), record);
                }
            }
        }
        Ok(changed)
    }

    fn remove(&self, key: &CacheKey) -> QuiverResult<bool> {
        let mut records = self
            .records
            .write()
            .map_err(|_| QuiverError::Storage(StorageError::LockPoisoned))?;
        Ok(records.remove(key).is_some())
    }

    fn remove_all(&self, keys: &[CacheKey]) -> QuiverResult<usize> {
        let mut records = self
            .records
            .write()
            .map_err(|_| QuiverError::Storage(StorageError::LockPoisoned))?;
        Ok(keys.iter().filter(|key| records.remove(key).is_some()).count())
    }

    fn clear(&self) -> QuiverResult<()> {
        self.records
            .write()
            .map_err(|_| QuiverError::Storage(StorageError::LockPoisoned))?
            .clear();
        Ok(())
    }

    fn dump(&self) -> QuiverResult<Vec<Record>> {
        let records = self
            .records
            .read()
            .map_err(|_| QuiverError::Storage(StorageError::LockPoisoned))?;
        Ok(records.values().cloned().collect())
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            record_count: self.len().unwrap_or(0) as u64,
            evictions: 0,
        }
    }
}

impl RecordSource for MemoryRecordStore {
    fn read_record(&self, key: &CacheKey) -> QuiverResult<Option<Record>> {
        self.get(key)
    }
}
