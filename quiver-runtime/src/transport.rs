//! Transport SPI
//!
//! The network stage hands an [`OperationPayload`] to a transport and
//! expects the raw response bytes back, shaped as
//! `{"data": {...} | null, "errors": [...]}`. HTTP, websockets or an
//! in-process executor are all just transports.

use async_trait::async_trait;
use quiver_core::{OperationPayload, TransportError};

/// Sends operations to a server.
///
/// # Example
/// ```ignore
/// struct HttpTransport { client: reqwest::Client, url: String }
///
/// #[async_trait]
/// impl Transport for HttpTransport {
///     async fn send(&self, payload: &OperationPayload) -> Result<Vec<u8>, TransportError> {
///         // POST the payload, return the body bytes
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one operation and return the raw response body.
    ///
    /// Connectivity problems and non-success HTTP statuses are errors;
    /// protocol errors inside a well-formed body are not.
    async fn send(&self, payload: &OperationPayload) -> Result<Vec<u8>, TransportError>;

    /// Release connections. Called once when the client is disposed.
    fn dispose(&self) {}
}
