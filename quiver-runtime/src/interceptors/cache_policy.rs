//! Cache policy stage
//!
//! Decides per request whether the store, the network, or both answer,
//! and merges every successful network result into the store.

use async_trait::async_trait;
use quiver_core::{FetchPolicy, QuiverResult};
use quiver_storage::NormalizedCache;
use std::sync::Arc;

use crate::chain::{Chain, Interceptor, InterceptorRequest, InterceptorResponse};

/// Applies the request's [`FetchPolicy`].
///
/// | Policy            | Behavior                                              |
/// |-------------------|-------------------------------------------------------|
/// | `CacheOnly`       | Store only; a miss yields a response without data.    |
/// | `CacheFirst`      | Store when complete, otherwise network.               |
/// | `NetworkOnly`     | Network only.                                         |
/// | `NetworkFirst`    | Network; store on connectivity or parse failure.      |
/// | `CacheAndNetwork` | Network here; the call delivers the store read first. |
///
/// Store failures are logged and treated as a miss, except under
/// `CacheOnly` where there is nothing else to fall back on.
pub struct CachePolicyInterceptor {
    cache: Arc<NormalizedCache>,
}

impl CachePolicyInterceptor {
    pub fn new(cache: Arc<NormalizedCache>) -> Self {
        Self { cache }
    }

    fn read(&self, request: &InterceptorRequest) -> QuiverResult<Option<InterceptorResponse>> {
        Ok(self
            .cache
            .read(&request.root_key(), &request.fields, &request.variables)?
            .map(InterceptorResponse::cached))
    }

    /// Store read with failures downgraded to a miss.
    fn read_or_miss(&self, request: &InterceptorRequest) -> Option<InterceptorResponse> {
        match self.read(request) {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(
                    operation = %request.operation_name,
                    error = %e,
                    "Store read failed, treating as cache miss"
                );
                None
            }
        }
    }

    async fn network(&self, request: InterceptorRequest, chain: Chain<'_>) -> QuiverResult<InterceptorResponse> {
        let operation = request.operation_name.clone();
        let response = chain.proceed(request).await?;
        if !response.records.is_empty() {
            match self.cache.merge(response.records.clone().into_records()) {
                Ok(changed) => tracing::debug!(
                    operation = %operation,
                    records = response.records.len(),
                    changed = changed.len(),
                    "Merged network response"
                ),
                Err(e) => tracing::warn!(
                    operation = %operation,
                    error = %e,
                    "Failed to merge network response"
                ),
            }
        }
        Ok(response)
    }
}

#[async_trait]
impl Interceptor for CachePolicyInterceptor {
    fn name(&self) -> &str {
        "cache-policy"
    }

    async fn intercept(&self, request: InterceptorRequest, chain: Chain<'_>) -> QuiverResult<InterceptorResponse> {
        match request.fetch_policy {
            FetchPolicy::CacheOnly => Ok(self.read(&request)?.unwrap_or_else(InterceptorResponse::cache_miss)),
            FetchPolicy::CacheFirst => match self.read_or_miss(&request) {
                Some(hit) => Ok(hit),
                None => self.network(request, chain).await,
            },
            FetchPolicy::NetworkOnly | FetchPolicy::CacheAndNetwork => self.network(request, chain).await,
            FetchPolicy::NetworkFirst => {
                let fallback = request.clone();
                match self.network(request, chain).await {
                    Err(e) if e.is_network_failure() => {
                        tracing::debug!(
                            operation = %fallback.operation_name,
                            error = %e,
                            "Network failed, falling back to store"
                        );
                        self.read_or_miss(&fallback).ok_or(e)
                    }
                    other => other,
                }
            }
        }
    }
}
