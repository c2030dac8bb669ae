//! Optimistic overlay
//!
//! Speculative writes live in ordered layers above the base store. Reads
//! fold the base record with every layer that touches its key, oldest to
//! newest, so a newer layer always wins a field. Rolling a layer back
//! recomputes the effective value only for the keys that layer touched and
//! reports exactly the fields whose effective value moved.

use quiver_core::{CacheKey, QuiverResult, Record, StorageError};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// One optimistic write, identified by the version of the call that made it.
#[derive(Debug, Clone)]
struct Layer {
    version: Uuid,
    records: HashMap<CacheKey, Record>,
}

/// Ordered stack of optimistic layers.
///
/// Layers are kept in an arena and ordered through a separate index list,
/// so removing a layer from the middle does not move any record data.
#[derive(Debug, Default)]
pub struct OptimisticOverlay {
    arena: Vec<Option<Layer>>,
    /// Arena slots of active layers, oldest first.
    order: Vec<usize>,
}

impl OptimisticOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Number of active layers.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Versions of active layers, oldest first.
    pub fn versions(&self) -> Vec<Uuid> {
        self.layers().map(|layer| layer.version).collect()
    }

    pub fn contains(&self, version: Uuid) -> bool {
        self.position(version).is_some()
    }

    /// Whether any active layer writes `field_key` of `key`.
    ///
    /// A shadowed field keeps its optimistic value when the base changes.
    pub fn shadows(&self, key: &CacheKey, field_key: &str) -> bool {
        self.layers()
            .any(|layer| layer.records.get(key).is_some_and(|r| r.has_field(field_key)))
    }

    /// Keys touched by any active layer.
    pub fn keys(&self) -> BTreeSet<CacheKey> {
        self.layers()
            .flat_map(|layer| layer.records.keys().cloned())
            .collect()
    }

    /// Effective record for `key`: `base` folded with every layer.
    pub fn apply(&self, key: &CacheKey, base: Option<Record>) -> Option<Record> {
        let mut effective = base;
        for layer in self.layers() {
            if let Some(patch) = layer.records.get(key) {
                effective
                    .get_or_insert_with(|| Record::new(key.clone()))
                    .merge(patch.clone());
            }
        }
        effective
    }

    /// Push records as the layer for `version`.
    ///
    /// Writing again under an active version merges into that layer in
    /// place. Returns the dependent keys whose effective value changed.
    pub fn write<F>(&mut self, version: Uuid, records: Vec<Record>, base: F) -> QuiverResult<BTreeSet<String>>
    where
        F: Fn(&CacheKey) -> QuiverResult<Option<Record>>,
    {
        let touched: BTreeSet<CacheKey> = records.iter().map(|r| r.key().clone()).collect();
        let before = self.snapshot(&touched, &base)?;

        let slot = match self.position(version) {
            Some(position) => self.order[position],
            None => {
                self.arena.push(Some(Layer {
                    version,
                    records: HashMap::new(),
                }));
                let slot = self.arena.len() - 1;
                self.order.push(slot);
                slot
            }
        };
        if let Some(layer) = self.arena[slot].as_mut() {
            for record in records {
                match layer.records.get_mut(record.key()) {
                    Some(existing) => {
                        existing.merge(record);
                    }
                    None => {
                        layer.records.insert(record.key().clone(), record);
                    }
                }
            }
        }

        let after = self.snapshot(&touched, &base)?;
        Ok(diff_all(before, after))
    }

    /// Remove the layer for `version`.
    ///
    /// Returns the dependent keys whose effective value changed; fields a
    /// newer layer also wrote keep their value and are not reported.
    pub fn rollback<F>(&mut self, version: Uuid, base: F) -> QuiverResult<BTreeSet<String>>
    where
        F: Fn(&CacheKey) -> QuiverResult<Option<Record>>,
    {
        let position = self
            .position(version)
            .ok_or(StorageError::UnknownLayer { version })?;
        let slot = self.order[position];
        let touched: BTreeSet<CacheKey> = self.arena[slot]
            .as_ref()
            .map(|layer| layer.records.keys().cloned().collect())
            .unwrap_or_default();
        let before = self.snapshot(&touched, &base)?;

        self.order.remove(position);
        self.arena[slot] = None;
        if self.order.is_empty() {
            self.arena.clear();
        }

        let after = self.snapshot(&touched, &base)?;
        Ok(diff_all(before, after))
    }

    /// Drop every layer without reporting changes.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.order.clear();
    }

    fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.order.iter().filter_map(|slot| self.arena[*slot].as_ref())
    }

    fn position(&self, version: Uuid) -> Option<usize> {
        self.order
            .iter()
            .position(|slot| self.arena[*slot].as_ref().is_some_and(|l| l.version == version))
    }

    fn snapshot<F>(&self, keys: &BTreeSet<CacheKey>, base: &F) -> QuiverResult<Vec<(CacheKey, Option<Record>)>>
    where
        F: Fn(&CacheKey) -> QuiverResult<Option<Record>>,
    {
        keys.iter()
            .map(|key| Ok((key.clone(), self.apply(key, base(key)?))))
            .collect()
    }
}

fn diff_all(before: Vec<(CacheKey, Option<Record>)>, after: Vec<(CacheKey, Option<Record>)>) -> BTreeSet<String> {
    let mut changed = BTreeSet::new();
    for ((key, old), (_, new)) in before.into_iter().zip(after) {
        changed.extend(diff(&key, old.as_ref(), new.as_ref()));
    }
    changed
}

/// Dependent keys of fields that differ between two versions of a record.
pub(crate) fn diff(key: &CacheKey, old: Option<&Record>, new: Option<&Record>) -> BTreeSet<String> {
    let field_keys: BTreeSet<&String> = old
        .into_iter()
        .chain(new)
        .flat_map(|record| record.fields().keys())
        .collect();
    field_keys
        .into_iter()
        .filter(|field_key| {
            old.and_then(|r| r.field(field_key)) != new.and_then(|r| r.field(field_key))
        })
        .map(|field_key| key.dependent_key(field_key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_core::{FieldValue, QuiverError};

    fn base_store(key: &CacheKey) -> QuiverResult<Option<Record>> {
        Ok((key.as_str() == "x").then(|| Record::new("x").with_field("name", "S").with_field("size", 1_i64)))
    }

    fn effective_name(overlay: &OptimisticOverlay) -> Option<FieldValue> {
        let key = CacheKey::from("x");
        overlay
            .apply(&key, base_store(&key).unwrap())
            .and_then(|r| r.field("name").cloned())
    }

    #[test]
    fn test_rollback_exactness_with_overlapping_layers() {
        let mut overlay = OptimisticOverlay::new();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();

        let changed = overlay
            .write(a, vec![Record::new("x").with_field("name", "A")], base_store)
            .unwrap();
        assert_eq!(changed, BTreeSet::from(["x.name".to_string()]));
        overlay
            .write(b, vec![Record::new("x").with_field("name", "B")], base_store)
            .unwrap();
        assert_eq!(effective_name(&overlay), Some(FieldValue::from("B")));

        // B still covers the field, so rolling back A changes nothing.
        let changed = overlay.rollback(a, base_store).unwrap();
        assert!(changed.is_empty());
        assert_eq!(effective_name(&overlay), Some(FieldValue::from("B")));

        let changed = overlay.rollback(b, base_store).unwrap();
        assert_eq!(changed, BTreeSet::from(["x.name".to_string()]));
        assert_eq!(effective_name(&overlay), Some(FieldValue::from("S")));
        assert!(overlay.is_empty());
    }

    #[test]
    fn test_rollback_newer_layer_reveals_older() {
        let mut overlay = OptimisticOverlay::new();
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        overlay
            .write(a, vec![Record::new("x").with_field("name", "A")], base_store)
            .unwrap();
        overlay
            .write(b, vec![Record::new("x").with_field("name", "B")], base_store)
            .unwrap();

        let changed = overlay.rollback(b, base_store).unwrap();
        assert_eq!(changed, BTreeSet::from(["x.name".to_string()]));
        assert_eq!(effective_name(&overlay), Some(FieldValue::from("A")));
    }

    #[test]
    fn test_layer_creates_record_absent_from_base() {
        let mut overlay = OptimisticOverlay::new();
        let version = Uuid::now_v7();
        let key = CacheKey::from("new");
        let changed = overlay
            .write(version, vec![Record::new("new").with_field("name", "draft")], base_store)
            .unwrap();
        assert_eq!(changed, BTreeSet::from(["new.name".to_string()]));
        assert!(overlay.apply(&key, None).is_some());
        assert!(overlay.shadows(&key, "name"));

        overlay.rollback(version, base_store).unwrap();
        assert_eq!(overlay.apply(&key, None), None);
    }

    #[test]
    fn test_same_version_merges_into_layer() {
        let mut overlay = OptimisticOverlay::new();
        let version = Uuid::now_v7();
        overlay
            .write(version, vec![Record::new("x").with_field("name", "A")], base_store)
            .unwrap();
        let changed = overlay
            .write(version, vec![Record::new("x").with_field("size", 2_i64)], base_store)
            .unwrap();
        assert_eq!(changed, BTreeSet::from(["x.size".to_string()]));
        assert_eq!(overlay.len(), 1);

        let changed = overlay.rollback(version, base_store).unwrap();
        assert_eq!(
            changed,
            BTreeSet::from(["x.name".to_string(), "x.size".to_string()])
        );
    }

    #[test]
    fn test_unknown_version_rollback_fails() {
        let mut overlay = OptimisticOverlay::new();
        let version = Uuid::now_v7();
        let err = overlay.rollback(version, base_store).unwrap_err();
        assert_eq!(err, QuiverError::Storage(StorageError::UnknownLayer { version }));
    }

    #[test]
    fn test_write_matching_base_reports_nothing() {
        let mut overlay = OptimisticOverlay::new();
        let changed = overlay
            .write(Uuid::now_v7(), vec![Record::new("x").with_field("name", "S")], base_store)
            .unwrap();
        assert!(changed.is_empty());
    }
}
