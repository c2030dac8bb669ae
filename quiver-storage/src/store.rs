//! Record store backend contract.
//!
//! This module defines the trait a storage backend must implement. The
//! normalized cache layers locking, optimistic updates and change
//! publication on top; a backend only needs keyed record storage with
//! precise change reporting.

use quiver_core::{CacheKey, QuiverResult, Record, RecordSet};
use serde::Serialize;
use std::collections::BTreeSet;

/// Storage backend for normalized records.
///
/// Implementations may be in-memory or persistent, bounded or not, as long
/// as the operations below keep their semantics.
///
/// # Merge semantics
///
/// `merge` unions each incoming record's fields into the stored record for
/// the same key (creating it if absent). Per field it is a shallow
/// last-write-wins replace. The returned set holds the `"key.fieldKey"`
/// dependent key of every field whose stored value changed, and must be
/// complete for the whole batch or the call must fail as a whole.
pub trait RecordStore: Send + Sync {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &str;

    /// Get the stored record for a key.
    fn get(&self, key: &CacheKey) -> QuiverResult<Option<Record>>;

    /// Merge records, returning the dependent keys that changed.
    fn merge(&self, records: Vec<Record>) -> QuiverResult<BTreeSet<String>>;

    /// Delete a record outright. Returns whether it existed.
    ///
    /// References to the removed record elsewhere are left dangling.
    fn remove(&self, key: &CacheKey) -> QuiverResult<bool>;

    /// Delete several records. Returns how many existed.
    fn remove_all(&self, keys: &[CacheKey]) -> QuiverResult<usize> {
        let mut removed = 0;
        for key in keys {
            if self.remove(key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Drop every record.
    fn clear(&self) -> QuiverResult<()>;

    /// Every stored record, in no particular order.
    fn dump(&self) -> QuiverResult<Vec<Record>>;

    /// Usage statistics.
    fn stats(&self) -> StoreStats {
        StoreStats::default()
    }
}

/// Read-only access to records, used when resolving references.
pub trait RecordSource {
    fn read_record(&self, key: &CacheKey) -> QuiverResult<Option<Record>>;
}

impl RecordSource for RecordSet {
    fn read_record(&self, key: &CacheKey) -> QuiverResult<Option<Record>> {
        Ok(self.get(key).cloned())
    }
}

/// Statistics about store usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Number of lookups that found a record.
    pub hits: u64,
    /// Number of lookups that found nothing.
    pub misses: u64,
    /// Number of records currently stored.
    pub record_count: u64,
    /// Number of records dropped to stay within capacity.
    pub evictions: u64,
}

impl StoreStats {
    /// Share of lookups that found a record; `0.0` before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        match self.hits + self.misses {
            0 => 0.0,
            lookups => self.hits as f64 / lookups as f64,
        }
    }
}
