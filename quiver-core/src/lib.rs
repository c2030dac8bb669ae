//! Quiver Core - Data Types
//!
//! Records, field schema, canonical field keys, typed operations and the
//! error taxonomy. All other Quiver crates depend on this one; it holds no
//! storage or execution logic.

pub mod cache_key;
pub mod config;
pub mod error;
pub mod field;
pub mod field_key;
pub mod operation;
pub mod record;
pub mod scalar;

pub use cache_key::{CacheKeyResolver, IdKeyResolver, PathKeyResolver};
pub use config::{ClientConfig, FetchPolicy};
pub use error::{
    ConfigError, DecodeError, ParseError, QuiverError, QuiverResult, StorageError, TransportError,
};
pub use field::{
    Argument, BooleanCondition, FieldKind, ResponseField, ScalarKind, Selection, TypeCondition,
    TYPENAME_FIELD,
};
pub use field_key::{FieldKeyCodec, UnresolvedVariablePolicy};
pub use operation::{
    GraphError, Location, Operation, OperationKind, OperationPayload, Response, Variables,
};
pub use record::{CacheKey, FieldValue, Record, RecordSet, MUTATION_ROOT_KEY, QUERY_ROOT_KEY};
pub use scalar::{BuiltinAdapter, ScalarAdapter, ScalarAdapterRegistry};
