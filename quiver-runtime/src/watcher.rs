//! Query watchers
//!
//! A watcher executes its query once, then follows the store: whenever a
//! publish touches one of the dependent keys of the last result, it reads
//! the query back from the store and delivers the data if it changed.
//! Store refreshes never hit the network.

use quiver_core::{
    FetchPolicy, Operation, QuiverError, QuiverResult, Response, Selection, StorageError, Variables,
};
use quiver_storage::{CacheSubscriber, StoreRead};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread::{self, ThreadId};
use uuid::Uuid;

use crate::call::{CallCallback, QueryCall};
use crate::chain::InterceptorResponse;

/// Handle to a running watcher. Dropping it cancels the watcher.
pub struct QueryWatcher<O: Operation> {
    inner: Arc<WatcherInner<O>>,
}

struct WatcherInner<O: Operation> {
    call: QueryCall<O>,
    fields: Selection,
    variables: Variables,
    callback: Box<dyn CallCallback<O::Data>>,
    active: AtomicBool,
    /// Set by publishers; cleared by whoever holds `delivery`.
    pending: AtomicBool,
    /// Held while reading the store and invoking the callback.
    delivery: Mutex<Delivery>,
    delivering_on: Mutex<Option<ThreadId>>,
    subscription: Mutex<Option<Uuid>>,
}

#[derive(Default)]
struct Delivery {
    last_data: Option<Map<String, JsonValue>>,
    delivered: bool,
}

impl<O: Operation> QueryWatcher<O> {
    pub(crate) fn start(call: QueryCall<O>, callback: Box<dyn CallCallback<O::Data>>) -> Self {
        let inner = Arc::new(WatcherInner {
            fields: call.operation.fields(),
            variables: call.operation.variables(),
            call,
            callback,
            active: AtomicBool::new(true),
            pending: AtomicBool::new(false),
            delivery: Mutex::new(Delivery::default()),
            delivering_on: Mutex::new(None),
            subscription: Mutex::new(None),
        });
        inner.spawn_fetch(inner.call.fetch_policy);
        Self { inner }
    }

    /// Fetch again from the network. Changes reach the callback through the
    /// store like any other update.
    pub fn refetch(&self) {
        self.inner.spawn_fetch(FetchPolicy::NetworkOnly);
    }

    /// Stop watching. No callback runs after this returns, except one
    /// already on the current thread's stack. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Dependent keys the watcher currently follows.
    pub fn dependent_keys(&self) -> BTreeSet<String> {
        let subscription = self.inner.subscription.lock().ok().and_then(|id| *id);
        match subscription {
            Some(id) => self
                .inner
                .call
                .client
                .cache()
                .subscription_keys(id)
                .ok()
                .flatten()
                .unwrap_or_default(),
            None => BTreeSet::new(),
        }
    }
}

impl<O: Operation> Drop for QueryWatcher<O> {
    fn drop(&mut self) {
        self.inner.cancel();
    }
}

impl<O: Operation> WatcherInner<O> {
    fn spawn_fetch(self: &Arc<Self>, fetch_policy: FetchPolicy) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        let watcher = self.clone();
        self.call.client.runtime().spawn(async move {
            let result = watcher.call.fetch(fetch_policy).await;
            watcher.complete_fetch(result);
        });
    }

    fn complete_fetch(self: &Arc<Self>, result: QuiverResult<InterceptorResponse>) {
        let response = match result {
            Ok(response) => response,
            Err(QuiverError::Canceled) => return,
            Err(e) => {
                let Ok(_delivery) = self.lock_delivery() else {
                    return;
                };
                self.invoke(Err(e));
                return;
            }
        };
        if let Err(e) = self.follow(self.keys_to_follow(&response)) {
            tracing::warn!(operation = %self.call.operation.name(), error = %e, "Failed to subscribe watcher");
        }
        let Ok(mut delivery) = self.lock_delivery() else {
            return;
        };
        if delivery.delivered && response.data.is_some() && delivery.last_data == response.data {
            return;
        }
        delivery.delivered = true;
        delivery.last_data = response.data.clone();
        self.invoke(response.into_response(self.call.operation.name()));
    }

    /// Keys a fetch result depends on. A result without data follows the
    /// store fields that were missing, so the watcher wakes once they land.
    fn keys_to_follow(&self, response: &InterceptorResponse) -> BTreeSet<String> {
        let mut keys = response.dependent_keys.clone();
        if response.data.is_some() {
            return keys;
        }
        let root_key = self.call.operation.kind().root_key();
        match self.call.client.cache().read_tracked(&root_key, &self.fields, &self.variables) {
            Ok(read) => keys.extend(read.dependent_keys().iter().cloned()),
            Err(e) => tracing::warn!(operation = %self.call.operation.name(), error = %e, "Failed to read watched keys"),
        }
        keys
    }

    /// Subscribe to `keys`, or move the existing subscription to them.
    fn follow(self: &Arc<Self>, keys: BTreeSet<String>) -> QuiverResult<()> {
        let cache = self.call.client.cache();
        let mut subscription = self.subscription.lock().map_err(|_| StorageError::LockPoisoned)?;
        if !self.active.load(Ordering::SeqCst) {
            return Ok(());
        }
        match *subscription {
            Some(id) => {
                cache.update_subscription(id, keys)?;
            }
            None => {
                let subscriber: Arc<dyn CacheSubscriber> = self.clone();
                *subscription = Some(cache.subscribe(keys, &subscriber)?);
            }
        }
        Ok(())
    }

    /// Read the query back from the store and deliver it if it changed.
    fn refresh(&self, delivery: &mut Delivery) {
        let cache = self.call.client.cache();
        let root_key = self.call.operation.kind().root_key();
        let read = match cache.read_tracked(&root_key, &self.fields, &self.variables) {
            Ok(StoreRead::Complete(read)) => read,
            Ok(StoreRead::Incomplete { dependent_keys }) => {
                tracing::debug!(operation = %self.call.operation.name(), "Watched data incomplete, skipping");
                self.retarget(dependent_keys);
                return;
            }
            Err(e) => {
                self.invoke(Err(e));
                return;
            }
        };
        self.retarget(read.dependent_keys.clone());

        if delivery.last_data.as_ref() == Some(&read.data) {
            tracing::trace!(operation = %self.call.operation.name(), "Watched data unchanged");
            return;
        }
        delivery.delivered = true;
        delivery.last_data = Some(read.data.clone());
        self.invoke(InterceptorResponse::cached(read).into_response(self.call.operation.name()));
    }

    /// Point the live subscription at `keys`.
    fn retarget(&self, keys: BTreeSet<String>) {
        let Ok(subscription) = self.subscription.lock() else {
            return;
        };
        if let Some(id) = *subscription {
            if let Err(e) = self.call.client.cache().update_subscription(id, keys) {
                tracing::warn!(error = %e, "Failed to refresh watcher keys");
            }
        }
    }

    /// Invoke the callback. The caller holds `delivery`.
    fn invoke(&self, result: QuiverResult<Response<O::Data>>) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        self.set_delivering(Some(thread::current().id()));
        match result {
            Ok(response) => self.callback.on_response(response),
            Err(e) => self.callback.on_failure(e),
        }
        self.set_delivering(None);
    }

    fn set_delivering(&self, owner: Option<ThreadId>) {
        if let Ok(mut delivering_on) = self.delivering_on.lock() {
            *delivering_on = owner;
        }
    }

    fn lock_delivery(&self) -> QuiverResult<MutexGuard<'_, Delivery>> {
        self.delivery
            .lock()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    fn cancel(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.call.token.cancel();

        let on_this_thread = self
            .delivering_on
            .lock()
            .map(|owner| *owner == Some(thread::current().id()))
            .unwrap_or(false);
        if !on_this_thread {
            // Wait out a delivery running on another thread.
            drop(self.delivery.lock());
        }

        let subscription = self.subscription.lock().ok().and_then(|mut id| id.take());
        if let Some(id) = subscription {
            if let Err(e) = self.call.client.cache().unsubscribe(id) {
                tracing::warn!(error = %e, "Failed to unsubscribe watcher");
            }
        }
        tracing::debug!(operation = %self.call.operation.name(), "Watcher canceled");
    }
}

impl<O: Operation> CacheSubscriber for WatcherInner<O> {
    fn on_cache_changed(&self, changed_keys: &BTreeSet<String>) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        tracing::trace!(
            operation = %self.call.operation.name(),
            changed = changed_keys.len(),
            "Watched keys changed"
        );
        self.pending.store(true, Ordering::SeqCst);
        loop {
            let mut delivery = match self.delivery.try_lock() {
                Ok(guard) => guard,
                // The holder picks up `pending` before releasing.
                Err(TryLockError::WouldBlock) => return,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            };
            while self.pending.swap(false, Ordering::SeqCst) {
                if !self.active.load(Ordering::SeqCst) {
                    return;
                }
                self.refresh(&mut delivery);
            }
            drop(delivery);
            if !self.pending.load(Ordering::SeqCst) {
                return;
            }
        }
    }
}
