//! Network stage: the end of the chain.

use async_trait::async_trait;
use quiver_core::{QuiverError, QuiverResult, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::chain::{Chain, Interceptor, InterceptorRequest, InterceptorResponse};
use crate::transport::Transport;

/// Sends the request through a [`Transport`] and returns the raw body.
///
/// Cancellation is checked before anything is sent, and an in-flight send
/// is dropped as soon as the call's token fires.
pub struct NetworkInterceptor {
    transport: Arc<dyn Transport>,
    disposed: AtomicBool,
}

impl NetworkInterceptor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            disposed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Interceptor for NetworkInterceptor {
    fn name(&self) -> &str {
        "network"
    }

    async fn intercept(&self, request: InterceptorRequest, _chain: Chain<'_>) -> QuiverResult<InterceptorResponse> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(TransportError::Disposed.into());
        }
        if request.is_canceled() {
            return Err(QuiverError::Canceled);
        }

        let payload = request.payload();
        tracing::debug!(
            operation = %payload.operation_name,
            call_id = %request.call_id,
            "Sending operation"
        );
        let body = tokio::select! {
            biased;
            _ = request.cancellation.cancelled() => return Err(QuiverError::Canceled),
            result = self.transport.send(&payload) => result?,
        };
        tracing::debug!(
            operation = %payload.operation_name,
            bytes = body.len(),
            "Received response"
        );
        Ok(InterceptorResponse::network(body))
    }

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.transport.dispose();
        }
    }
}
