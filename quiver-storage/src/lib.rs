//! Quiver Storage - Record Stores and the Normalized Cache
//!
//! Backends implement [`RecordStore`]. [`NormalizedCache`] wraps a backend
//! with the optimistic overlay, a single writer lock and change publication,
//! and drives the [`ResponseNormalizer`] for both writes and reads.
//!
//! # Example
//!
//! ```ignore
//! let cache = NormalizedCache::in_memory()
//!     .with_key_resolver(Arc::new(IdKeyResolver::default()));
//!
//! // Network payload in, flat records out
//! let written = cache.write_response(&CacheKey::query_root(), &fields, &data, &variables)?;
//!
//! // Same schema, read back from the store (None on a miss)
//! let read = cache.read(&CacheKey::query_root(), &fields, &variables)?;
//! ```

pub mod cache;
pub mod lru;
pub mod memory;
pub mod normalizer;
pub mod optimistic;
pub mod resolver;
pub mod store;
pub mod subscription;

pub use cache::NormalizedCache;
pub use lru::LruRecordStore;
pub use memory::MemoryRecordStore;
pub use normalizer::{CacheRead, Normalized, ResponseNormalizer, StoreRead};
pub use optimistic::OptimisticOverlay;
pub use resolver::{FieldValueResolver, GraphFieldValueResolver, MapFieldValueResolver, RawValue};
pub use store::{RecordSource, RecordStore, StoreStats};
pub use subscription::{CacheSubscriber, SubscriptionRegistry};
