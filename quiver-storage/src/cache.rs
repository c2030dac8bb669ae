//! Normalized cache
//!
//! The client-facing store. It layers three things over a [`RecordStore`]
//! backend: the optimistic overlay, a single writer lock that serializes
//! every mutation, and change publication to subscribers. Reads take the
//! read side of the same lock and see one consistent snapshot.

use quiver_core::{
    CacheKey, CacheKeyResolver, FieldKeyCodec, PathKeyResolver, QuiverError, QuiverResult, Record,
    ResponseField, ScalarAdapterRegistry, StorageError, Variables,
};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::memory::MemoryRecordStore;
use crate::normalizer::{CacheRead, Normalized, ResponseNormalizer, StoreRead};
use crate::optimistic::OptimisticOverlay;
use crate::store::{RecordSource, RecordStore, StoreStats};
use crate::subscription::{CacheSubscriber, SubscriptionRegistry};

/// Record store with optimistic layers and change publication.
pub struct NormalizedCache {
    backend: Arc<dyn RecordStore>,
    /// Guards the overlay and serializes all writes to the backend.
    overlay: RwLock<OptimisticOverlay>,
    subscriptions: SubscriptionRegistry,
    key_resolver: Arc<dyn CacheKeyResolver>,
    scalars: Arc<ScalarAdapterRegistry>,
    codec: FieldKeyCodec,
}

impl NormalizedCache {
    /// Create a cache over `backend` with path-based keys and the default
    /// scalar adapters.
    pub fn new(backend: Arc<dyn RecordStore>) -> Self {
        Self {
            backend,
            overlay: RwLock::new(OptimisticOverlay::new()),
            subscriptions: SubscriptionRegistry::new(),
            key_resolver: Arc::new(PathKeyResolver),
            scalars: Arc::new(ScalarAdapterRegistry::new()),
            codec: FieldKeyCodec::default(),
        }
    }

    /// Create a cache over a fresh unbounded in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRecordStore::new()))
    }

    pub fn with_key_resolver(mut self, key_resolver: Arc<dyn CacheKeyResolver>) -> Self {
        self.key_resolver = key_resolver;
        self
    }

    pub fn with_scalars(mut self, scalars: Arc<ScalarAdapterRegistry>) -> Self {
        self.scalars = scalars;
        self
    }

    pub fn with_codec(mut self, codec: FieldKeyCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn backend(&self) -> &Arc<dyn RecordStore> {
        &self.backend
    }

    pub fn key_resolver(&self) -> &Arc<dyn CacheKeyResolver> {
        &self.key_resolver
    }

    pub fn scalars(&self) -> &Arc<ScalarAdapterRegistry> {
        &self.scalars
    }

    pub fn codec(&self) -> FieldKeyCodec {
        self.codec
    }

    pub fn stats(&self) -> StoreStats {
        self.backend.stats()
    }

    fn read_lock(&self) -> QuiverResult<RwLockReadGuard<'_, OptimisticOverlay>> {
        self.overlay
            .read()
            .map_err(|_| QuiverError::Storage(StorageError::LockPoisoned))
    }

    fn write_lock(&self) -> QuiverResult<RwLockWriteGuard<'_, OptimisticOverlay>> {
        self.overlay
            .write()
            .map_err(|_| QuiverError::Storage(StorageError::LockPoisoned))
    }

    // ========================================================================
    // RECORDS
    // ========================================================================

    /// Effective record for `key`: the stored record with optimistic layers
    /// applied.
    pub fn get(&self, key: &CacheKey) -> QuiverResult<Option<Record>> {
        let overlay = self.read_lock()?;
        Ok(overlay.apply(key, self.backend.get(key)?))
    }

    /// Every effective record, ordered by key.
    pub fn dump(&self) -> QuiverResult<Vec<Record>> {
        let overlay = self.read_lock()?;
        let mut records: BTreeMap<CacheKey, Record> = self
            .backend
            .dump()?
            .into_iter()
            .map(|record| (record.key().clone(), record))
            .collect();
        for key in overlay.keys() {
            let base = records.remove(&key);
            if let Some(record) = overlay.apply(&key, base) {
                records.insert(key, record);
            }
        }
        Ok(records.into_values().collect())
    }

    /// Merge records into the store and publish the effective changes.
    ///
    /// Fields covered by an active optimistic layer change underneath it
    /// but keep their effective value, so they are not reported.
    pub fn merge(&self, records: Vec<Record>) -> QuiverResult<BTreeSet<String>> {
        if records.is_empty() {
            return Ok(BTreeSet::new());
        }
        let changed = {
            let overlay = self.write_lock()?;
            let changed = self.backend.merge(records)?;
            unshadowed(&overlay, changed)
        };
        self.publish(&changed)?;
        Ok(changed)
    }

    /// Delete a record. References to it elsewhere are left dangling.
    pub fn remove(&self, key: &CacheKey) -> QuiverResult<bool> {
        Ok(self.remove_all(std::slice::from_ref(key))? > 0)
    }

    /// Delete several records. Returns how many existed.
    pub fn remove_all(&self, keys: &[CacheKey]) -> QuiverResult<usize> {
        let (removed, changed) = {
            let overlay = self.write_lock()?;
            let mut changed = BTreeSet::new();
            for key in keys {
                if let Some(record) = self.backend.get(key)? {
                    changed.extend(record.dependent_keys());
                }
            }
            let removed = self.backend.remove_all(keys)?;
            (removed, unshadowed(&overlay, changed))
        };
        self.publish(&changed)?;
        Ok(removed)
    }

    /// Drop every record and every optimistic layer.
    pub fn clear(&self) -> QuiverResult<()> {
        let changed = {
            let mut overlay = self.write_lock()?;
            let mut changed: BTreeSet<String> = self
                .backend
                .dump()?
                .iter()
                .flat_map(Record::dependent_keys)
                .collect();
            for key in overlay.keys() {
                if let Some(record) = overlay.apply(&key, None) {
                    changed.extend(record.dependent_keys());
                }
            }
            self.backend.clear()?;
            overlay.clear();
            changed
        };
        tracing::debug!(changed = changed.len(), "Cleared cache");
        self.publish(&changed)?;
        Ok(())
    }

    // ========================================================================
    // OPTIMISTIC LAYERS
    // ========================================================================

    /// Write records as the optimistic layer for `version`.
    pub fn write_optimistic(&self, version: Uuid, records: Vec<Record>) -> QuiverResult<BTreeSet<String>> {
        let changed = {
            let mut overlay = self.write_lock()?;
            overlay.write(version, records, |key| self.backend.get(key))?
        };
        tracing::debug!(version = %version, changed = changed.len(), "Wrote optimistic layer");
        self.publish(&changed)?;
        Ok(changed)
    }

    /// Roll back the optimistic layer for `version`.
    ///
    /// Fails with [`StorageError::UnknownLayer`] if no such layer is active.
    pub fn rollback_optimistic(&self, version: Uuid) -> QuiverResult<BTreeSet<String>> {
        let changed = {
            let mut overlay = self.write_lock()?;
            overlay.rollback(version, |key| self.backend.get(key))?
        };
        tracing::debug!(version = %version, changed = changed.len(), "Rolled back optimistic layer");
        self.publish(&changed)?;
        Ok(changed)
    }

    /// Versions of the active optimistic layers, oldest first.
    pub fn optimistic_versions(&self) -> QuiverResult<Vec<Uuid>> {
        Ok(self.read_lock()?.versions())
    }

    // ========================================================================
    // OPERATIONS
    // ========================================================================

    /// Normalize payload data without touching the store.
    pub fn normalize(
        &self,
        root_key: &CacheKey,
        fields: &[ResponseField],
        data: &Map<String, JsonValue>,
        variables: &Variables,
    ) -> QuiverResult<Normalized> {
        ResponseNormalizer::new(self.codec, &self.scalars, variables).normalize(
            root_key,
            fields,
            data,
            self.key_resolver.as_ref(),
        )
    }

    /// Normalize payload data and merge the resulting records.
    ///
    /// A decode failure leaves the store untouched.
    pub fn write_response(
        &self,
        root_key: &CacheKey,
        fields: &[ResponseField],
        data: &Map<String, JsonValue>,
        variables: &Variables,
    ) -> QuiverResult<Normalized> {
        let normalized = self.normalize(root_key, fields, data, variables)?;
        self.merge(normalized.records.clone().into_records())?;
        Ok(normalized)
    }

    /// Normalize payload data into the optimistic layer for `version`.
    pub fn write_optimistic_response(
        &self,
        version: Uuid,
        root_key: &CacheKey,
        fields: &[ResponseField],
        data: &Map<String, JsonValue>,
        variables: &Variables,
    ) -> QuiverResult<BTreeSet<String>> {
        let normalized = self.normalize(root_key, fields, data, variables)?;
        self.write_optimistic(version, normalized.records.into_records())
    }

    /// Read an operation's data from the effective store.
    ///
    /// `Ok(None)` is a cache miss.
    pub fn read(
        &self,
        root_key: &CacheKey,
        fields: &[ResponseField],
        variables: &Variables,
    ) -> QuiverResult<Option<CacheRead>> {
        self.read_tracked(root_key, fields, variables)
            .map(StoreRead::into_complete)
    }

    /// Read an operation's data, keeping the dependent keys of a miss.
    pub fn read_tracked(
        &self,
        root_key: &CacheKey,
        fields: &[ResponseField],
        variables: &Variables,
    ) -> QuiverResult<StoreRead> {
        let overlay = self.read_lock()?;
        let snapshot = Snapshot {
            backend: self.backend.as_ref(),
            overlay: &overlay,
        };
        let read = ResponseNormalizer::new(self.codec, &self.scalars, variables).read_tracked(
            root_key,
            fields,
            &snapshot,
            self.key_resolver.as_ref(),
        )?;
        match &read {
            StoreRead::Complete(hit) => {
                tracing::debug!(root = %root_key, keys = hit.dependent_keys.len(), "Cache hit")
            }
            StoreRead::Incomplete { dependent_keys } => {
                tracing::debug!(root = %root_key, keys = dependent_keys.len(), "Cache miss")
            }
        }
        Ok(read)
    }

    // ========================================================================
    // SUBSCRIPTIONS
    // ========================================================================

    /// Register `subscriber` for changes to any of `keys`.
    ///
    /// Only a weak handle is kept; dropping the last strong handle ends
    /// the subscription.
    pub fn subscribe(&self, keys: BTreeSet<String>, subscriber: &Arc<dyn CacheSubscriber>) -> QuiverResult<Uuid> {
        self.subscriptions.subscribe(keys, subscriber)
    }

    pub fn update_subscription(&self, id: Uuid, keys: BTreeSet<String>) -> QuiverResult<bool> {
        self.subscriptions.update(id, keys)
    }

    pub fn subscription_keys(&self, id: Uuid) -> QuiverResult<Option<BTreeSet<String>>> {
        self.subscriptions.keys(id)
    }

    pub fn unsubscribe(&self, id: Uuid) -> QuiverResult<bool> {
        self.subscriptions.unsubscribe(id)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Notify every subscriber whose keys intersect `changed_keys`.
    pub fn publish(&self, changed_keys: &BTreeSet<String>) -> QuiverResult<()> {
        if changed_keys.is_empty() {
            return Ok(());
        }
        let interested = self.subscriptions.interested(changed_keys)?;
        tracing::debug!(
            changed = changed_keys.len(),
            notified = interested.len(),
            "Published cache changes"
        );
        for subscriber in interested {
            subscriber.on_cache_changed(changed_keys);
        }
        Ok(())
    }
}

impl std::fmt::Debug for NormalizedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NormalizedCache")
            .field("backend", &self.backend.name())
            .field("subscriptions", &self.subscriptions)
            .field("codec", &self.codec)
            .finish()
    }
}

/// Drop changes an optimistic layer hides.
fn unshadowed(overlay: &OptimisticOverlay, changed: BTreeSet<String>) -> BTreeSet<String> {
    if overlay.is_empty() {
        return changed;
    }
    changed
        .into_iter()
        .filter(|dependent_key| !is_shadowed(overlay, dependent_key))
        .collect()
}

fn is_shadowed(overlay: &OptimisticOverlay, dependent_key: &str) -> bool {
    // Record keys may themselves contain dots, so try every split point.
    dependent_key
        .match_indices('.')
        .any(|(i, _)| overlay.shadows(&CacheKey::from(&dependent_key[..i]), &dependent_key[i + 1..]))
}

/// Effective view of the store while the read lock is held.
struct Snapshot<'a> {
    backend: &'a dyn RecordStore,
    overlay: &'a OptimisticOverlay,
}

impl RecordSource for Snapshot<'_> {
    fn read_record(&self, key: &CacheKey) -> QuiverResult<Option<Record>> {
        Ok(self.overlay.apply(key, self.backend.get(key)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lru::LruRecordStore;
    use quiver_core::{Argument, FieldValue, IdKeyResolver};
    use serde_json::json;
    use std::sync::Mutex;

    fn object(value: JsonValue) -> Map<String, JsonValue> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn cache() -> NormalizedCache {
        NormalizedCache::in_memory().with_key_resolver(Arc::new(IdKeyResolver::default()))
    }

    fn hero_fields() -> Vec<ResponseField> {
        vec![ResponseField::object(
            "hero",
            vec![
                ResponseField::id("id"),
                ResponseField::string("name"),
                ResponseField::object_list("friends", vec![ResponseField::id("id"), ResponseField::string("name")]),
            ],
        )
        .argument("episode", Argument::variable("episode"))]
    }

    fn hero_payload() -> Map<String, JsonValue> {
        object(json!({
            "hero": {
                "id": "2001",
                "name": "R2-D2",
                "friends": [
                    {"id": "1000", "name": "Luke Skywalker"},
                    {"id": "1002", "name": "Han Solo"}
                ]
            }
        }))
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<BTreeSet<String>>>);

    impl CacheSubscriber for Recorder {
        fn on_cache_changed(&self, changed_keys: &BTreeSet<String>) {
            if let Ok(mut calls) = self.0.lock() {
                calls.push(changed_keys.clone());
            }
        }
    }

    impl Recorder {
        fn calls(&self) -> Vec<BTreeSet<String>> {
            self.0.lock().map(|calls| calls.clone()).unwrap_or_default()
        }
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let cache = cache();
        let variables = object(json!({"episode": "EMPIRE"}));
        let root = CacheKey::query_root();
        let written = cache
            .write_response(&root, &hero_fields(), &hero_payload(), &variables)
            .unwrap();

        let r2 = cache.get(&CacheKey::from("2001")).unwrap().unwrap();
        assert_eq!(r2.field("name"), Some(&FieldValue::from("R2-D2")));

        let read = cache.read(&root, &hero_fields(), &variables).unwrap().unwrap();
        assert_eq!(read.data, written.data);
        assert_eq!(read.dependent_keys, written.dependent_keys);

        // Other arguments are a different field: a miss.
        let jedi = object(json!({"episode": "JEDI"}));
        assert!(cache.read(&root, &hero_fields(), &jedi).unwrap().is_none());
    }

    #[test]
    fn test_decode_error_leaves_store_untouched() {
        let cache = cache();
        let fields = vec![ResponseField::object(
            "hero",
            vec![ResponseField::id("id"), ResponseField::string("name").non_null()],
        )];
        let payload = object(json!({"hero": {"id": "2001", "name": null}}));
        assert!(cache
            .write_response(&CacheKey::query_root(), &fields, &payload, &Variables::new())
            .is_err());
        assert!(cache.dump().unwrap().is_empty());
    }

    #[test]
    fn test_publish_reaches_only_intersecting_subscribers() {
        let cache = cache();
        cache
            .merge(vec![
                Record::new("2001").with_field("name", "R2-D2"),
                Record::new("1000").with_field("name", "Luke"),
            ])
            .unwrap();

        let hero = Arc::new(Recorder::default());
        let luke = Arc::new(Recorder::default());
        let hero_dyn: Arc<dyn CacheSubscriber> = hero.clone();
        let luke_dyn: Arc<dyn CacheSubscriber> = luke.clone();
        cache.subscribe(BTreeSet::from(["2001.name".to_string()]), &hero_dyn).unwrap();
        cache.subscribe(BTreeSet::from(["1000.name".to_string()]), &luke_dyn).unwrap();

        cache.merge(vec![Record::new("2001").with_field("name", "Artoo")]).unwrap();
        // Identical re-write publishes nothing.
        cache.merge(vec![Record::new("2001").with_field("name", "Artoo")]).unwrap();

        assert_eq!(hero.calls(), vec![BTreeSet::from(["2001.name".to_string()])]);
        assert!(luke.calls().is_empty());
    }

    #[test]
    fn test_optimistic_layer_reads_and_rollback() {
        let cache = cache();
        cache.merge(vec![Record::new("2001").with_field("name", "R2-D2")]).unwrap();
        let recorder = Arc::new(Recorder::default());
        let subscriber: Arc<dyn CacheSubscriber> = recorder.clone();
        cache.subscribe(BTreeSet::from(["2001.name".to_string()]), &subscriber).unwrap();

        let version = Uuid::now_v7();
        cache
            .write_optimistic(version, vec![Record::new("2001").with_field("name", "Artoo")])
            .unwrap();
        assert_eq!(
            cache.get(&CacheKey::from("2001")).unwrap().unwrap().field("name"),
            Some(&FieldValue::from("Artoo"))
        );

        // The base changes under the layer; the effective value does not.
        let changed = cache
            .merge(vec![Record::new("2001").with_field("name", "R2")])
            .unwrap();
        assert!(changed.is_empty());

        cache.rollback_optimistic(version).unwrap();
        assert_eq!(
            cache.get(&CacheKey::from("2001")).unwrap().unwrap().field("name"),
            Some(&FieldValue::from("R2"))
        );
        assert_eq!(recorder.calls().len(), 2);
        assert!(cache.optimistic_versions().unwrap().is_empty());
    }

    #[test]
    fn test_rollback_unknown_version_fails() {
        let cache = cache();
        let version = Uuid::now_v7();
        assert_eq!(
            cache.rollback_optimistic(version).unwrap_err(),
            QuiverError::Storage(StorageError::UnknownLayer { version })
        );
    }

    #[test]
    fn test_remove_publishes_and_leaves_references_dangling() {
        let cache = cache();
        let variables = object(json!({"episode": "EMPIRE"}));
        let root = CacheKey::query_root();
        cache
            .write_response(&root, &hero_fields(), &hero_payload(), &variables)
            .unwrap();
        let recorder = Arc::new(Recorder::default());
        let subscriber: Arc<dyn CacheSubscriber> = recorder.clone();
        cache.subscribe(BTreeSet::from(["1002.name".to_string()]), &subscriber).unwrap();

        assert!(cache.remove(&CacheKey::from("1002")).unwrap());
        assert!(!cache.remove(&CacheKey::from("1002")).unwrap());
        assert_eq!(recorder.calls().len(), 1);
        assert!(cache.read(&root, &hero_fields(), &variables).unwrap().is_none());
    }

    #[test]
    fn test_clear_drops_records_and_layers() {
        let cache = cache();
        cache.merge(vec![Record::new("a").with_field("x", 1_i64)]).unwrap();
        cache
            .write_optimistic(Uuid::now_v7(), vec![Record::new("b").with_field("y", 2_i64)])
            .unwrap();
        assert_eq!(cache.dump().unwrap().len(), 2);

        cache.clear().unwrap();
        assert!(cache.dump().unwrap().is_empty());
        assert!(cache.optimistic_versions().unwrap().is_empty());
    }

    #[test]
    fn test_bounded_backend() {
        let cache = NormalizedCache::new(Arc::new(LruRecordStore::new(2)));
        cache
            .merge(vec![
                Record::new("a").with_field("x", 1_i64),
                Record::new("b").with_field("x", 2_i64),
                Record::new("c").with_field("x", 3_i64),
            ])
            .unwrap();
        assert_eq!(cache.dump().unwrap().len(), 2);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_dotted_record_keys_are_shadowed() {
        let cache = cache();
        let key = CacheKey::from("QUERY_ROOT.hero");
        cache
            .write_optimistic(Uuid::now_v7(), vec![Record::new(key.clone()).with_field("name", "draft")])
            .unwrap();
        let changed = cache
            .merge(vec![Record::new(key).with_field("name", "real")])
            .unwrap();
        assert!(changed.is_empty());
    }
}
