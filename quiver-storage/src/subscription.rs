//! Change subscriptions
//!
//! Watchers register the dependent keys they read. The registry keeps only a
//! weak handle to each subscriber, so a dropped watcher never keeps itself
//! alive through the store; dead entries are pruned on the next publish.

use quiver_core::{QuiverError, QuiverResult, StorageError};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, Weak};
use uuid::Uuid;

/// Receives the dependent keys changed by a store mutation.
///
/// Called with no store lock held, so implementations may read the store.
pub trait CacheSubscriber: Send + Sync {
    fn on_cache_changed(&self, changed_keys: &BTreeSet<String>);
}

struct Registration {
    keys: BTreeSet<String>,
    subscriber: Weak<dyn CacheSubscriber>,
}

/// Subscriber table shared by one cache.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<Uuid, Registration>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscriber` for `keys`. Returns the subscription id.
    pub fn subscribe(&self, keys: BTreeSet<String>, subscriber: &Arc<dyn CacheSubscriber>) -> QuiverResult<Uuid> {
        let id = Uuid::now_v7();
        self.entries
            .write()
            .map_err(|_| QuiverError::Storage(StorageError::LockPoisoned))?
            .insert(
                id,
                Registration {
                    keys,
                    subscriber: Arc::downgrade(subscriber),
                },
            );
        Ok(id)
    }

    /// Replace the keys of a subscription. Returns whether it exists.
    pub fn update(&self, id: Uuid, keys: BTreeSet<String>) -> QuiverResult<bool> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| QuiverError::Storage(StorageError::LockPoisoned))?;
        Ok(match entries.get_mut(&id) {
            Some(registration) => {
                registration.keys = keys;
                true
            }
            None => false,
        })
    }

    pub fn unsubscribe(&self, id: Uuid) -> QuiverResult<bool> {
        Ok(self
            .entries
            .write()
            .map_err(|_| QuiverError::Storage(StorageError::LockPoisoned))?
            .remove(&id)
            .is_some())
    }

    /// Keys of a subscription, if it exists.
    pub fn keys(&self, id: Uuid) -> QuiverResult<Option<BTreeSet<String>>> {
        Ok(self
            .entries
            .read()
            .map_err(|_| QuiverError::Storage(StorageError::LockPoisoned))?
            .get(&id)
            .map(|registration| registration.keys.clone()))
    }

    /// Number of registered subscriptions, live or not yet pruned.
    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live subscribers whose keys intersect `changed`.
    ///
    /// The table is snapshotted under the read lock and released before
    /// anything is returned; dropped subscribers are removed afterwards.
    pub fn interested(&self, changed: &BTreeSet<String>) -> QuiverResult<Vec<Arc<dyn CacheSubscriber>>> {
        let mut live = Vec::new();
        let mut dead = Vec::new();
        {
            let entries = self
                .entries
                .read()
                .map_err(|_| QuiverError::Storage(StorageError::LockPoisoned))?;
            for (id, registration) in entries.iter() {
                if registration.keys.is_disjoint(changed) {
                    continue;
                }
                match registration.subscriber.upgrade() {
                    Some(subscriber) => live.push(subscriber),
                    None => dead.push(*id),
                }
            }
        }
        if !dead.is_empty() {
            let mut entries = self
                .entries
                .write()
                .map_err(|_| QuiverError::Storage(StorageError::LockPoisoned))?;
            for id in dead {
                entries.remove(&id);
            }
        }
        Ok(live)
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.len())
            .finish()
    }
}
