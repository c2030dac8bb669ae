//! Built-in interceptors
//!
//! A client chain always ends with these three, in order:
//!
//! 1. [`CachePolicyInterceptor`]: applies the fetch policy and commits
//!    normalized network results to the store.
//! 2. [`ParseInterceptor`]: parses the body bytes and normalizes the data.
//! 3. [`NetworkInterceptor`]: sends the payload through the transport.

pub mod cache_policy;
pub mod network;
pub mod parse;

pub use cache_policy::CachePolicyInterceptor;
pub use network::NetworkInterceptor;
pub use parse::ParseInterceptor;
