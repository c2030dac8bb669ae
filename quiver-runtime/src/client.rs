//! Client and builder

use quiver_core::{
    CacheKeyResolver, ClientConfig, ConfigError, FieldKeyCodec, FetchPolicy, Operation, QuiverResult,
    ScalarAdapter, ScalarAdapterRegistry,
};
use quiver_storage::{LruRecordStore, MemoryRecordStore, NormalizedCache, RecordStore};
use std::sync::Arc;
use tokio::runtime::Handle;

use crate::call::{MutationCall, QueryCall};
use crate::chain::{Interceptor, InterceptorChain};
use crate::interceptors::{CachePolicyInterceptor, NetworkInterceptor, ParseInterceptor};
use crate::transport::Transport;

/// Entry point for executing operations.
///
/// Cheap to clone; clones share the store, the chain and the runtime.
#[derive(Clone)]
pub struct QuiverClient {
    pub(crate) inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub(crate) cache: Arc<NormalizedCache>,
    pub(crate) chain: InterceptorChain,
    pub(crate) config: ClientConfig,
    pub(crate) runtime: Handle,
}

impl QuiverClient {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Prepare a query using the configured default fetch policy.
    pub fn query<O: Operation>(&self, operation: O) -> QueryCall<O> {
        QueryCall::new(self.clone(), operation, self.inner.config.default_fetch_policy)
    }

    /// Prepare a mutation. Mutations always go to the network.
    pub fn mutate<O: Operation>(&self, operation: O) -> MutationCall<O> {
        MutationCall::new(self.clone(), operation)
    }

    pub fn cache(&self) -> &Arc<NormalizedCache> {
        &self.inner.cache
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Interceptor names in execution order.
    pub fn interceptors(&self) -> Vec<&str> {
        self.inner.chain.names()
    }

    /// Dispose the chain and the transport. Calls made afterwards fail with
    /// [`quiver_core::TransportError::Disposed`]. Idempotent.
    pub fn dispose(&self) {
        self.inner.chain.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.chain.is_disposed()
    }
}

impl std::fmt::Debug for QuiverClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuiverClient")
            .field("chain", &self.inner.chain)
            .field("config", &self.inner.config)
            .finish()
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Assembles a [`QuiverClient`].
///
/// # Example
/// ```ignore
/// let client = QuiverClient::builder()
///     .with_transport(Arc::new(HttpTransport::new(url)))
///     .with_key_resolver(Arc::new(IdKeyResolver::new("id")))
///     .with_config(ClientConfig::from_env()?)
///     .build()?;
/// ```
#[derive(Default)]
pub struct ClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn RecordStore>>,
    key_resolver: Option<Arc<dyn CacheKeyResolver>>,
    scalars: ScalarAdapterRegistry,
    interceptors: Vec<Arc<dyn Interceptor>>,
    config: ClientConfig,
    runtime: Option<Handle>,
}

impl ClientBuilder {
    /// Required.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Backend for normalized records. Defaults to an in-memory store,
    /// bounded when the config sets a capacity.
    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_key_resolver(mut self, key_resolver: Arc<dyn CacheKeyResolver>) -> Self {
        self.key_resolver = Some(key_resolver);
        self
    }

    pub fn with_scalar_adapter(mut self, type_id: impl Into<String>, adapter: Arc<dyn ScalarAdapter>) -> Self {
        self.scalars.register(type_id, adapter);
        self
    }

    /// Add an interceptor. User interceptors run in insertion order, ahead
    /// of the built-in stages.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.config.default_fetch_policy = policy;
        self
    }

    /// Runtime that enqueued calls and watchers are spawned on. Defaults to
    /// the runtime `build` is called from.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> QuiverResult<QuiverClient> {
        let transport = self.transport.ok_or_else(|| ConfigError::MissingRequired {
            field: "transport".to_string(),
        })?;
        self.config.validate()?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| ConfigError::MissingRequired {
                field: "runtime".to_string(),
            })?,
        };

        let store: Arc<dyn RecordStore> = match (self.store, self.config.store_capacity) {
            (Some(store), _) => store,
            (None, Some(capacity)) => Arc::new(LruRecordStore::new(capacity)),
            (None, None) => Arc::new(MemoryRecordStore::new()),
        };
        let mut cache = NormalizedCache::new(store)
            .with_scalars(Arc::new(self.scalars))
            .with_codec(FieldKeyCodec::new(self.config.unresolved_variables));
        if let Some(key_resolver) = self.key_resolver {
            cache = cache.with_key_resolver(key_resolver);
        }
        let cache = Arc::new(cache);

        let mut interceptors = self.interceptors;
        interceptors.push(Arc::new(CachePolicyInterceptor::new(cache.clone())));
        interceptors.push(Arc::new(ParseInterceptor::new(cache.clone())));
        interceptors.push(Arc::new(NetworkInterceptor::new(transport)));
        let chain = InterceptorChain::new(interceptors);

        tracing::debug!(
            store = cache.backend().name(),
            interceptors = ?chain.names(),
            fetch_policy = %self.config.default_fetch_policy,
            "Built client"
        );

        Ok(QuiverClient {
            inner: Arc::new(ClientInner {
                cache,
                chain,
                config: self.config,
                runtime,
            }),
        })
    }
}
