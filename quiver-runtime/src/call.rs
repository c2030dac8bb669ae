//! Calls
//!
//! A call binds one operation to a client. It can be awaited
//! ([`QueryCall::execute`]), run to completion on the current thread
//! ([`QueryCall::execute_blocking`]) or spawned onto the client's runtime
//! with results reported through a [`CallCallback`]
//! ([`QueryCall::enqueue`]). All three run the same future.

use futures_util::Stream;
use quiver_core::{FetchPolicy, Operation, QuiverError, QuiverResult, Response, StorageError};
use quiver_storage::NormalizedCache;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::chain::{InterceptorRequest, InterceptorResponse};
use crate::client::QuiverClient;
use crate::watcher::QueryWatcher;

// ============================================================================
// CALLBACKS AND HANDLES
// ============================================================================

/// Receives the results of an enqueued call or a watcher.
///
/// Closures taking a `QuiverResult<Response<D>>` implement this trait.
pub trait CallCallback<D>: Send + Sync + 'static {
    fn on_response(&self, response: Response<D>);

    fn on_failure(&self, error: QuiverError);
}

impl<D, F> CallCallback<D> for F
where
    F: Fn(QuiverResult<Response<D>>) + Send + Sync + 'static,
{
    fn on_response(&self, response: Response<D>) {
        self(Ok(response))
    }

    fn on_failure(&self, error: QuiverError) {
        self(Err(error))
    }
}

/// Cancels an enqueued call.
///
/// Once canceled, no callback is invoked for the call and an in-flight
/// network request is dropped.
#[derive(Debug, Clone)]
pub struct CallHandle {
    call_id: Uuid,
    token: CancellationToken,
}

impl CallHandle {
    pub fn id(&self) -> Uuid {
        self.call_id
    }

    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            tracing::debug!(call_id = %self.call_id, "Canceling call");
            self.token.cancel();
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Run a request through the client's chain, stopping as soon as the
/// request's token fires.
async fn run_chain(client: &QuiverClient, request: InterceptorRequest) -> QuiverResult<InterceptorResponse> {
    let token = request.cancellation.clone();
    if token.is_cancelled() {
        return Err(QuiverError::Canceled);
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(QuiverError::Canceled),
        result = client.inner.chain.proceed(request) => result,
    }
}

/// Hand a result to a callback unless the call was canceled.
fn emit<D: 'static>(token: &CancellationToken, callback: &dyn CallCallback<D>, result: QuiverResult<Response<D>>) {
    if token.is_cancelled() {
        return;
    }
    match result {
        Ok(response) => callback.on_response(response),
        Err(QuiverError::Canceled) => {}
        Err(e) => callback.on_failure(e),
    }
}

// ============================================================================
// QUERIES
// ============================================================================

/// A prepared query.
pub struct QueryCall<O: Operation> {
    pub(crate) client: QuiverClient,
    pub(crate) operation: Arc<O>,
    pub(crate) fetch_policy: FetchPolicy,
    pub(crate) call_id: Uuid,
    pub(crate) token: CancellationToken,
}

impl<O: Operation> QueryCall<O> {
    pub(crate) fn new(client: QuiverClient, operation: O, fetch_policy: FetchPolicy) -> Self {
        Self {
            client,
            operation: Arc::new(operation),
            fetch_policy,
            call_id: Uuid::now_v7(),
            token: CancellationToken::new(),
        }
    }

    pub fn with_fetch_policy(mut self, fetch_policy: FetchPolicy) -> Self {
        self.fetch_policy = fetch_policy;
        self
    }

    pub fn fetch_policy(&self) -> FetchPolicy {
        self.fetch_policy
    }

    pub fn operation(&self) -> &O {
        &self.operation
    }

    pub fn handle(&self) -> CallHandle {
        CallHandle {
            call_id: self.call_id,
            token: self.token.clone(),
        }
    }

    pub fn cancel(&self) {
        self.handle().cancel()
    }

    pub(crate) fn request(&self, fetch_policy: FetchPolicy) -> InterceptorRequest {
        InterceptorRequest::from_operation(self.operation.as_ref(), self.call_id, fetch_policy, self.token.clone())
    }

    pub(crate) async fn fetch(&self, fetch_policy: FetchPolicy) -> QuiverResult<InterceptorResponse> {
        run_chain(&self.client, self.request(fetch_policy)).await
    }

    /// Execute the query and return its response.
    ///
    /// Under [`FetchPolicy::CacheAndNetwork`] only the network result is
    /// returned; use [`QueryCall::enqueue`] or [`QueryCall::responses`] to
    /// receive the cached result as well.
    pub async fn execute(&self) -> QuiverResult<Response<O::Data>> {
        self.fetch(self.fetch_policy)
            .await?
            .into_response(self.operation.name())
    }

    /// Execute the query, blocking the current thread on the client's
    /// runtime.
    ///
    /// # Panics
    /// Panics when called from within an asynchronous execution context.
    pub fn execute_blocking(&self) -> QuiverResult<Response<O::Data>> {
        self.client.inner.runtime.block_on(self.execute())
    }

    /// Spawn the query onto the client's runtime and report through
    /// `callback`.
    pub fn enqueue<C: CallCallback<O::Data>>(self, callback: C) -> CallHandle {
        let handle = self.handle();
        let runtime = self.client.inner.runtime.clone();
        runtime.spawn(async move { self.deliver(&callback).await });
        handle
    }

    /// Every result the call produces, in delivery order.
    pub fn responses(self) -> impl Stream<Item = QuiverResult<Response<O::Data>>> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.enqueue(move |result: QuiverResult<Response<O::Data>>| {
            let _ = tx.send(result);
        });
        futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx))
    }

    /// Execute once, then keep `callback` updated as the store changes.
    pub fn watcher<C: CallCallback<O::Data>>(self, callback: C) -> QueryWatcher<O> {
        QueryWatcher::start(self, Box::new(callback))
    }

    async fn deliver(&self, callback: &dyn CallCallback<O::Data>) {
        let name = self.operation.name();
        if self.fetch_policy == FetchPolicy::CacheAndNetwork {
            match self.fetch(FetchPolicy::CacheOnly).await {
                Ok(cached) if cached.data.is_some() => match cached.into_response(name) {
                    Ok(response) => emit(&self.token, callback, Ok(response)),
                    Err(e) => tracing::debug!(operation = %name, error = %e, "Skipping unmappable cached data"),
                },
                Ok(_) => {}
                Err(e) => tracing::debug!(operation = %name, error = %e, "Cached read failed"),
            }
        }
        let result = match self.fetch(self.fetch_policy).await {
            Ok(response) => response.into_response(name),
            Err(e) => Err(e),
        };
        emit(&self.token, callback, result);
    }
}

// ============================================================================
// MUTATIONS
// ============================================================================

/// A prepared mutation.
///
/// Mutations always go to the network. Optimistic data, when given, is
/// visible in the store while the mutation is in flight and is rolled back
/// once it completes, after the server's result has been merged.
pub struct MutationCall<O: Operation> {
    client: QuiverClient,
    operation: Arc<O>,
    call_id: Uuid,
    token: CancellationToken,
    optimistic: Option<Map<String, JsonValue>>,
}

impl<O: Operation> MutationCall<O> {
    pub(crate) fn new(client: QuiverClient, operation: O) -> Self {
        Self {
            client,
            operation: Arc::new(operation),
            call_id: Uuid::now_v7(),
            token: CancellationToken::new(),
            optimistic: None,
        }
    }

    /// Expected response data, shaped like the mutation's `data` object.
    pub fn optimistic_updates(mut self, data: Map<String, JsonValue>) -> Self {
        self.optimistic = Some(data);
        self
    }

    pub fn handle(&self) -> CallHandle {
        CallHandle {
            call_id: self.call_id,
            token: self.token.clone(),
        }
    }

    pub fn cancel(&self) {
        self.handle().cancel()
    }

    pub async fn execute(&self) -> QuiverResult<Response<O::Data>> {
        let request = InterceptorRequest::from_operation(
            self.operation.as_ref(),
            self.call_id,
            FetchPolicy::NetworkOnly,
            self.token.clone(),
        );
        let _layer = match &self.optimistic {
            Some(data) => {
                self.client.inner.cache.write_optimistic_response(
                    self.call_id,
                    &request.root_key(),
                    &request.fields,
                    data,
                    &request.variables,
                )?;
                Some(OptimisticLayer {
                    cache: self.client.inner.cache.clone(),
                    version: self.call_id,
                })
            }
            None => None,
        };
        run_chain(&self.client, request)
            .await?
            .into_response(self.operation.name())
    }

    /// # Panics
    /// Panics when called from within an asynchronous execution context.
    pub fn execute_blocking(&self) -> QuiverResult<Response<O::Data>> {
        self.client.inner.runtime.block_on(self.execute())
    }

    pub fn enqueue<C: CallCallback<O::Data>>(self, callback: C) -> CallHandle {
        let handle = self.handle();
        let runtime = self.client.inner.runtime.clone();
        runtime.spawn(async move {
            let result = self.execute().await;
            emit(&self.token, &callback, result);
        });
        handle
    }
}

/// Rolls an optimistic layer back when dropped, whether the mutation
/// succeeded, failed or was abandoned.
struct OptimisticLayer {
    cache: Arc<NormalizedCache>,
    version: Uuid,
}

impl Drop for OptimisticLayer {
    fn drop(&mut self) {
        match self.cache.rollback_optimistic(self.version) {
            Ok(_) | Err(QuiverError::Storage(StorageError::UnknownLayer { .. })) => {}
            Err(e) => tracing::warn!(version = %self.version, error = %e, "Failed to roll back optimistic layer"),
        }
    }
}
