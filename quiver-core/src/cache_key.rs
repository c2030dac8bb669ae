//! Cache key resolution SPI.

use serde_json::{Map, Value as JsonValue};

use crate::field::{ResponseField, TYPENAME_FIELD};
use crate::record::CacheKey;

/// Maps decoded objects to normalized record keys.
///
/// Returning `None` means "no natural key": the object is stored under its
/// structural path (`parentKey.fieldKey`, plus an index for list elements).
pub trait CacheKeyResolver: Send + Sync {
    /// Key for an object read from a network payload.
    fn from_record_set(&self, field: &ResponseField, object: &Map<String, JsonValue>) -> Option<CacheKey>;

    /// Key for a field looked up by its (resolved) arguments on the cache
    /// read path, e.g. `character(id: "1000")` -> `1000`.
    fn from_arguments(&self, field: &ResponseField, arguments: &Map<String, JsonValue>) -> Option<CacheKey> {
        let _ = (field, arguments);
        None
    }
}

/// Resolver that never provides a key; everything is keyed by path.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathKeyResolver;

impl CacheKeyResolver for PathKeyResolver {
    fn from_record_set(&self, _field: &ResponseField, _object: &Map<String, JsonValue>) -> Option<CacheKey> {
        None
    }
}

/// Resolver keying objects by an identifier field.
///
/// With `typename_prefix` enabled keys look like `Droid:2001`, which keeps
/// ids of different types from colliding.
#[derive(Debug, Clone)]
pub struct IdKeyResolver {
    id_field: String,
    typename_prefix: bool,
}

impl IdKeyResolver {
    pub fn new(id_field: impl Into<String>) -> Self {
        Self {
            id_field: id_field.into(),
            typename_prefix: false,
        }
    }

    pub fn with_typename_prefix(mut self) -> Self {
        self.typename_prefix = true;
        self
    }

    fn key_for(&self, id: &JsonValue, typename: Option<&str>) -> Option<CacheKey> {
        let id = match id {
            JsonValue::String(s) if !s.is_empty() => s.clone(),
            JsonValue::Number(n) => n.to_string(),
            _ => return None,
        };
        match (self.typename_prefix, typename) {
            (true, Some(typename)) => Some(CacheKey::new(format!("{}:{}", typename, id))),
            (true, None) => None,
            (false, _) => Some(CacheKey::new(id)),
        }
    }
}

impl Default for IdKeyResolver {
    fn default() -> Self {
        Self::new("id")
    }
}

impl CacheKeyResolver for IdKeyResolver {
    fn from_record_set(&self, _field: &ResponseField, object: &Map<String, JsonValue>) -> Option<CacheKey> {
        let typename = object.get(TYPENAME_FIELD).and_then(JsonValue::as_str);
        self.key_for(object.get(&self.id_field)?, typename)
    }

    fn from_arguments(&self, _field: &ResponseField, arguments: &Map<String, JsonValue>) -> Option<CacheKey> {
        // Arguments carry no typename, so prefixed keys cannot be derived.
        if self.typename_prefix {
            return None;
        }
        self.key_for(arguments.get(&self.id_field)?, None)
    }
}
