//! Typed operations and the responses they produce.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeSet;

use crate::field::Selection;
use crate::record::CacheKey;

/// Operation variables, keyed by variable name.
pub type Variables = Map<String, JsonValue>;

/// Whether an operation reads or writes on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Query,
    Mutation,
}

impl OperationKind {
    /// Key of the record holding this operation's top-level fields.
    pub fn root_key(&self) -> CacheKey {
        match self {
            OperationKind::Query => CacheKey::query_root(),
            OperationKind::Mutation => CacheKey::mutation_root(),
        }
    }
}

/// A typed operation, usually produced by code generation.
///
/// The read schema returned by [`Operation::fields`] drives both decoding a
/// network payload and reading the same data back from the store. `Data`
/// is deserialized from the JSON tree that the schema resolves.
pub trait Operation: Send + Sync + 'static {
    type Data: DeserializeOwned + Send + 'static;

    /// Canonical document identifier (e.g. a document hash).
    fn operation_id(&self) -> &str;

    fn name(&self) -> &str;

    fn document(&self) -> &str;

    fn kind(&self) -> OperationKind {
        OperationKind::Query
    }

    fn variables(&self) -> Variables {
        Variables::new()
    }

    fn fields(&self) -> Selection;
}

/// What a transport receives for one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationPayload {
    pub operation_id: String,
    pub operation_name: String,
    pub query: String,
    pub variables: Variables,
}

// ============================================================================
// PROTOCOL ERRORS
// ============================================================================

/// Position of a protocol error in the operation document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u64,
    pub column: u64,
}

/// One entry of the payload's `errors` array.
///
/// Protocol errors are data, not failures: they travel alongside whatever
/// (possibly partial) data the server returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphError {
    pub message: String,
    #[serde(default)]
    pub locations: Vec<Location>,
    /// Any other attributes the server attached (`path`, `extensions`, ...).
    #[serde(flatten)]
    pub custom_attributes: Map<String, JsonValue>,
}

impl GraphError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            custom_attributes: Map::new(),
        }
    }
}

// ============================================================================
// RESPONSE
// ============================================================================

/// Result of executing an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Response<D> {
    pub operation_name: String,
    pub data: Option<D>,
    pub errors: Vec<GraphError>,
    /// Every `"recordKey.fieldKey"` the data was read from or written to.
    pub dependent_keys: BTreeSet<String>,
    pub from_cache: bool,
    pub extensions: Map<String, JsonValue>,
}

impl<D> Response<D> {
    pub fn new(operation_name: impl Into<String>, data: Option<D>) -> Self {
        Self {
            operation_name: operation_name.into(),
            data,
            errors: Vec::new(),
            dependent_keys: BTreeSet::new(),
            from_cache: false,
            extensions: Map::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Transform the data while keeping the response metadata.
    pub fn map_data<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(D) -> U,
    {
        Response {
            operation_name: self.operation_name,
            data: self.data.map(f),
            errors: self.errors,
            dependent_keys: self.dependent_keys,
            from_cache: self.from_cache,
            extensions: self.extensions,
        }
    }

    /// Like [`Response::map_data`] with a fallible mapping.
    pub fn try_map_data<U, E, F>(self, f: F) -> Result<Response<U>, E>
    where
        F: FnOnce(D) -> Result<U, E>,
    {
        let data = self.data.map(f).transpose()?;
        Ok(Response {
            operation_name: self.operation_name,
            data,
            errors: self.errors,
            dependent_keys: self.dependent_keys,
            from_cache: self.from_cache,
            extensions: self.extensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_graph_error_keeps_custom_attributes() {
        let err: GraphError = serde_json::from_value(json!({
            "message": "Cannot query field",
            "locations": [{"line": 1, "column": 14}],
            "path": ["hero", "age"],
            "extensions": {"code": "GRAPHQL_VALIDATION_FAILED"}
        }))
        .unwrap();
        assert_eq!(err.message, "Cannot query field");
        assert_eq!(err.locations, vec![Location { line: 1, column: 14 }]);
        assert_eq!(err.custom_attributes.get("path"), Some(&json!(["hero", "age"])));
        assert!(err.custom_attributes.contains_key("extensions"));
    }

    #[test]
    fn test_graph_error_without_locations() {
        let err: GraphError = serde_json::from_value(json!({"message": "boom"})).unwrap();
        assert!(err.locations.is_empty());
        assert!(err.custom_attributes.is_empty());
    }

    #[test]
    fn test_response_map_data() {
        let mut response = Response::new("Hero", Some(2));
        response.errors.push(GraphError::new("partial"));
        response.dependent_keys.insert("QUERY_ROOT.hero".to_string());
        let mapped = response.map_data(|n| n * 10);
        assert_eq!(mapped.data, Some(20));
        assert!(mapped.has_errors());
        assert_eq!(mapped.dependent_keys.len(), 1);
    }

    #[test]
    fn test_root_keys() {
        assert_eq!(OperationKind::Query.root_key().as_str(), "QUERY_ROOT");
        assert_eq!(OperationKind::Mutation.root_key().as_str(), "MUTATION_ROOT");
    }

    #[test]
    fn test_payload_serializes_camel_case() {
        let payload = OperationPayload {
            operation_id: "abc".to_string(),
            operation_name: "Hero".to_string(),
            query: "query Hero { hero { name } }".to_string(),
            variables: Variables::new(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["operationName"], json!("Hero"));
        assert_eq!(json["operationId"], json!("abc"));
    }
}
