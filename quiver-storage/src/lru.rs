//! Bounded in-memory record store with least-recently-used eviction.

use quiver_core::{CacheKey, QuiverError, QuiverResult, Record, StorageError};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use crate::store::{RecordSource, RecordStore, StoreStats};

/// Record store holding at most `capacity` records.
///
/// Reads and writes both refresh a record's recency; once a merge pushes
/// the store past capacity the least recently used records are dropped.
/// Eviction is silent: references to evicted records read as missing.
#[derive(Debug)]
pub struct LruRecordStore {
    capacity: usize,
    state: Mutex<LruState>,
}

#[derive(Debug, Default)]
struct LruState {
    records: HashMap<CacheKey, (Record, u64)>,
    /// Recency tick -> key, oldest first.
    recency: BTreeMap<u64, CacheKey>,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl LruState {
    fn touch(&mut self, key: &CacheKey) {
        self.tick += 1;
        let tick = self.tick;
        if let Some((_, last)) = self.records.get_mut(key) {
            self.recency.remove(last);
            *last = tick;
            self.recency.insert(tick, key.clone());
        }
    }

    fn evict_to(&mut self, capacity: usize) {
        while self.records.len() > capacity {
            let Some((_, key)) = self.recency.pop_first() else {
                break;
            };
            self.records.remove(&key);
            self.evictions += 1;
            tracing::debug!(key = %key, "Evicted least recently used record");
        }
    }
}

impl LruRecordStore {
    /// Create a store holding at most `capacity` records (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(LruState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> QuiverResult<std::sync::MutexGuard<'_, LruState>> {
        self.state
            .lock()
            .map_err(|_| QuiverError::Storage(StorageError::LockPoisoned))
    }
}

impl RecordStore for LruRecordStore {
    fn name(&self) -> &str {
        "lru"
    }

    fn get(&self, key: &CacheKey) -> QuiverResult<Option<Record>> {
        let mut state = self.lock()?;
        let record = state.records.get(key).map(|(record, _)| record.clone());
        if record.is_some() {
            state.hits += 1;
            state.touch(key);
        } else {
            state.misses += 1;
        }
        Ok(record)
    }

    fn merge(&self, incoming: Vec<Record>) -> QuiverResult<BTreeSet<String>> {
        let mut state = self.lock()?;
        let mut changed = BTreeSet::new();
        for record in incoming {
            let key = record.key().clone();
            match state.records.get_mut(&key) {
                Some((existing, _)) => changed.extend(existing.merge(record)),
                None => {
                    changed.extend(record.dependent_keys());
                    state.records.insert(key.clone(), (record, 0));
                }
            }
            state.touch(&key);
        }
        state.evict_to(self.capacity);
        Ok(changed)
    }

    fn remove(&self, key: &CacheKey) -> QuiverResult<bool> {
        let mut state = self.lock()?;
        match state.records.remove(key) {
            Some((_, tick)) => {
                state.recency.remove(&tick);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn clear(&self) -> QuiverResult<()> {
        let mut state = self.lock()?;
        state.records.clear();
        state.recency.clear();
        Ok(())
    }

    fn dump(&self) -> QuiverResult<Vec<Record>> {
        let state = self.lock()?;
        Ok(state.records.values().map(|(record, _)| record.clone()).collect())
    }

    fn stats(&self) -> StoreStats {
        match self.lock() {
            Ok(state) => StoreStats {
                hits: state.hits,
                misses: state.misses,
                record_count: state.records.len() as u64,
                evictions: state.evictions,
            },
            Err(_) => StoreStats::default(),
        }
    }
}

impl RecordSource for LruRecordStore {
    fn read_record(&self, key: &CacheKey) -> QuiverResult<Option<Record>> {
        self.get(key)
    }
}
