//! Quiver Runtime - Calls, Interceptors and Watchers
//!
//! Executes typed operations against a [`Transport`] through an ordered
//! interceptor chain, keeps the normalized store up to date, and lets
//! watchers follow the store as it changes.
//!
//! # Example
//! ```ignore
//! use quiver_runtime::{QuiverClient, FetchPolicy};
//!
//! let client = QuiverClient::builder()
//!     .with_transport(transport)
//!     .build()?;
//!
//! // Network first time, store afterwards
//! let response = client.query(HeroQuery::new("EMPIRE")).execute().await?;
//!
//! // Follow the store
//! let watcher = client
//!     .query(HeroQuery::new("EMPIRE"))
//!     .with_fetch_policy(FetchPolicy::CacheFirst)
//!     .watcher(|result| println!("{result:?}"));
//! ```

pub mod call;
pub mod chain;
pub mod client;
pub mod interceptors;
pub mod transport;
pub mod watcher;

pub use call::{CallCallback, CallHandle, MutationCall, QueryCall};
pub use chain::{Chain, Interceptor, InterceptorChain, InterceptorRequest, InterceptorResponse};
pub use client::{ClientBuilder, QuiverClient};
pub use interceptors::{CachePolicyInterceptor, NetworkInterceptor, ParseInterceptor};
pub use quiver_core::FetchPolicy;
pub use transport::Transport;
pub use watcher::QueryWatcher;
