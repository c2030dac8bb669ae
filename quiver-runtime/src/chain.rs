//! Interceptor chain
//!
//! Every call runs through an ordered list of interceptors. Each one gets
//! the request and the rest of the chain, and may answer on its own,
//! rewrite the request before calling [`Chain::proceed`], or post-process
//! what the rest of the chain returned.

use async_trait::async_trait;
use quiver_core::{
    CacheKey, FetchPolicy, GraphError, Operation, OperationKind, OperationPayload, QuiverError,
    QuiverResult, RecordSet, Response, Selection, TransportError, Variables,
};
use quiver_storage::CacheRead;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ============================================================================
// REQUEST / RESPONSE
// ============================================================================

/// An operation on its way through the chain, with its type erased.
#[derive(Debug, Clone)]
pub struct InterceptorRequest {
    /// Identifies the call; also the version of its optimistic layer.
    pub call_id: Uuid,
    pub operation_id: String,
    pub operation_name: String,
    pub document: String,
    pub kind: OperationKind,
    pub variables: Variables,
    pub fields: Selection,
    pub fetch_policy: FetchPolicy,
    pub cancellation: CancellationToken,
}

impl InterceptorRequest {
    pub fn from_operation<O: Operation>(
        operation: &O,
        call_id: Uuid,
        fetch_policy: FetchPolicy,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            call_id,
            operation_id: operation.operation_id().to_string(),
            operation_name: operation.name().to_string(),
            document: operation.document().to_string(),
            kind: operation.kind(),
            variables: operation.variables(),
            fields: operation.fields(),
            fetch_policy,
            cancellation,
        }
    }

    pub fn with_fetch_policy(mut self, fetch_policy: FetchPolicy) -> Self {
        self.fetch_policy = fetch_policy;
        self
    }

    /// Key of the record holding the operation's top-level fields.
    pub fn root_key(&self) -> CacheKey {
        self.kind.root_key()
    }

    /// What the transport sends for this request.
    pub fn payload(&self) -> OperationPayload {
        OperationPayload {
            operation_id: self.operation_id.clone(),
            operation_name: self.operation_name.clone(),
            query: self.document.clone(),
            variables: self.variables.clone(),
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// What comes back up the chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterceptorResponse {
    /// Body bytes as received from the transport, before parsing.
    pub raw: Option<Vec<u8>>,
    /// Data read through the operation's field schema.
    pub data: Option<Map<String, JsonValue>>,
    pub errors: Vec<GraphError>,
    pub extensions: Map<String, JsonValue>,
    /// Normalized records of a network response, not yet merged.
    pub records: RecordSet,
    pub dependent_keys: BTreeSet<String>,
    pub from_cache: bool,
}

impl InterceptorResponse {
    /// Unparsed network response.
    pub fn network(raw: Vec<u8>) -> Self {
        Self {
            raw: Some(raw),
            ..Default::default()
        }
    }

    /// Complete read from the store.
    pub fn cached(read: CacheRead) -> Self {
        Self {
            data: Some(read.data),
            dependent_keys: read.dependent_keys,
            from_cache: true,
            ..Default::default()
        }
    }

    /// The store does not hold the requested data.
    pub fn cache_miss() -> Self {
        Self {
            from_cache: true,
            ..Default::default()
        }
    }

    /// Map the data onto the operation's typed data.
    pub fn into_response<D: DeserializeOwned>(self, operation_name: &str) -> QuiverResult<Response<D>> {
        let data = match self.data {
            Some(data) => Some(serde_json::from_value(JsonValue::Object(data)).map_err(|e| {
                quiver_core::DecodeError::DataMapping {
                    operation: operation_name.to_string(),
                    reason: e.to_string(),
                }
            })?),
            None => None,
        };
        Ok(Response {
            operation_name: operation_name.to_string(),
            data,
            errors: self.errors,
            dependent_keys: self.dependent_keys,
            from_cache: self.from_cache,
            extensions: self.extensions,
        })
    }
}

// ============================================================================
// INTERCEPTOR
// ============================================================================

/// One stage of the chain.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn intercept(&self, request: InterceptorRequest, chain: Chain<'_>) -> QuiverResult<InterceptorResponse>;

    /// Release resources. Called at most once, when the chain is disposed.
    fn dispose(&self) {}
}

/// The interceptors after the current one.
#[derive(Clone, Copy)]
pub struct Chain<'a> {
    rest: &'a [Arc<dyn Interceptor>],
}

impl<'a> Chain<'a> {
    /// Hand the request to the next interceptor.
    pub async fn proceed(self, request: InterceptorRequest) -> QuiverResult<InterceptorResponse> {
        match self.rest.split_first() {
            Some((next, rest)) => {
                tracing::trace!(
                    interceptor = next.name(),
                    operation = %request.operation_name,
                    "Proceeding"
                );
                next.intercept(request, Chain { rest }).await
            }
            None => Err(QuiverError::interceptor(
                "chain ended without producing a response",
            )),
        }
    }

    /// Number of interceptors left.
    pub fn remaining(&self) -> usize {
        self.rest.len()
    }
}

/// Ordered interceptors owned by a client.
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
    disposed: AtomicBool,
}

impl InterceptorChain {
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            interceptors,
            disposed: AtomicBool::new(false),
        }
    }

    /// Run a request through every interceptor.
    pub async fn proceed(&self, request: InterceptorRequest) -> QuiverResult<InterceptorResponse> {
        if self.is_disposed() {
            return Err(TransportError::Disposed.into());
        }
        Chain {
            rest: &self.interceptors,
        }
        .proceed(request)
        .await
    }

    /// Dispose every interceptor. Later calls do nothing.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        for interceptor in &self.interceptors {
            interceptor.dispose();
        }
        tracing::debug!(interceptors = self.interceptors.len(), "Disposed interceptor chain");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn names(&self) -> Vec<&str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("interceptors", &self.names())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_core::ResponseField;
    use std::sync::atomic::AtomicUsize;

    fn request() -> InterceptorRequest {
        InterceptorRequest {
            call_id: Uuid::now_v7(),
            operation_id: "op-1".to_string(),
            operation_name: "Hero".to_string(),
            document: "query Hero { hero { name } }".to_string(),
            kind: OperationKind::Query,
            variables: Variables::new(),
            fields: vec![ResponseField::object("hero", vec![ResponseField::string("name")])].into(),
            fetch_policy: FetchPolicy::NetworkOnly,
            cancellation: CancellationToken::new(),
        }
    }

    /// Answers with fixed data.
    struct Terminal;

    #[async_trait]
    impl Interceptor for Terminal {
        fn name(&self) -> &str {
            "terminal"
        }

        async fn intercept(&self, _request: InterceptorRequest, _chain: Chain<'_>) -> QuiverResult<InterceptorResponse> {
            let mut data = Map::new();
            data.insert("hero".to_string(), serde_json::json!({"name": "R2-D2"}));
            Ok(InterceptorResponse {
                data: Some(data),
                ..Default::default()
            })
        }
    }

    /// Rewrites the request and tags the response on the way back.
    struct Rewriter {
        disposed: AtomicUsize,
    }

    #[async_trait]
    impl Interceptor for Rewriter {
        fn name(&self) -> &str {
            "rewriter"
        }

        async fn intercept(&self, request: InterceptorRequest, chain: Chain<'_>) -> QuiverResult<InterceptorResponse> {
            let mut response = chain.proceed(request.with_fetch_policy(FetchPolicy::CacheOnly)).await?;
            response
                .extensions
                .insert("rewritten".to_string(), JsonValue::Bool(true));
            Ok(response)
        }

        fn dispose(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Fails without proceeding.
    struct Reject;

    #[async_trait]
    impl Interceptor for Reject {
        fn name(&self) -> &str {
            "reject"
        }

        async fn intercept(&self, _request: InterceptorRequest, _chain: Chain<'_>) -> QuiverResult<InterceptorResponse> {
            Err(QuiverError::interceptor("not allowed"))
        }
    }

    #[tokio::test]
    async fn test_chain_runs_in_order() {
        let chain = InterceptorChain::new(vec![
            Arc::new(Rewriter {
                disposed: AtomicUsize::new(0),
            }),
            Arc::new(Terminal),
        ]);
        let response = chain.proceed(request()).await.unwrap();
        assert_eq!(response.extensions.get("rewritten"), Some(&JsonValue::Bool(true)));
        assert!(response.data.is_some());
    }

    #[tokio::test]
    async fn test_short_circuit_error_propagates() {
        let chain = InterceptorChain::new(vec![Arc::new(Reject), Arc::new(Terminal)]);
        let err = chain.proceed(request()).await.unwrap_err();
        assert_eq!(err, QuiverError::interceptor("not allowed"));
    }

    #[tokio::test]
    async fn test_exhausted_chain_is_an_error() {
        let chain = InterceptorChain::new(vec![]);
        assert!(matches!(
            chain.proceed(request()).await,
            Err(QuiverError::Interceptor { .. })
        ));
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent_and_blocks_requests() {
        let rewriter = Arc::new(Rewriter {
            disposed: AtomicUsize::new(0),
        });
        let chain = InterceptorChain::new(vec![rewriter.clone(), Arc::new(Terminal)]);
        chain.dispose();
        chain.dispose();
        assert_eq!(rewriter.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(
            chain.proceed(request()).await.unwrap_err(),
            QuiverError::Transport(TransportError::Disposed)
        );
    }

    #[test]
    fn test_into_response_maps_typed_data() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Hero {
            name: String,
        }
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Data {
            hero: Hero,
        }

        let mut data = Map::new();
        data.insert("hero".to_string(), serde_json::json!({"name": "R2-D2"}));
        let response: Response<Data> = InterceptorResponse {
            data: Some(data),
            ..Default::default()
        }
        .into_response("Hero")
        .unwrap();
        assert_eq!(response.data.unwrap().hero.name, "R2-D2");

        let mut wrong = Map::new();
        wrong.insert("hero".to_string(), serde_json::json!({"name": 5}));
        let err = InterceptorResponse {
            data: Some(wrong),
            ..Default::default()
        }
        .into_response::<Data>("Hero")
        .unwrap_err();
        assert!(matches!(
            err,
            QuiverError::Decode(quiver_core::DecodeError::DataMapping { .. })
        ));
    }
}
