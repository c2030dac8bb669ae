//! Scalar adapters.
//!
//! Every scalar read from a payload or the store passes through the adapter
//! registered for its type id. The registry is owned by a client instance;
//! there is no process-wide adapter table.

use serde_json::{Number, Value as JsonValue};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{DecodeError, QuiverResult};

/// Converts a scalar between its wire form and its canonical form.
pub trait ScalarAdapter: Send + Sync {
    /// Normalize a non-null wire value. Errors carry a human-readable reason.
    fn decode(&self, value: JsonValue) -> Result<JsonValue, String>;

    /// Convert a canonical value back to its wire form.
    fn encode(&self, value: JsonValue) -> Result<JsonValue, String> {
        Ok(value)
    }
}

/// Adapters for the built-in scalar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinAdapter {
    String,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Map,
    List,
}

impl ScalarAdapter for BuiltinAdapter {
    fn decode(&self, value: JsonValue) -> Result<JsonValue, String> {
        match self {
            BuiltinAdapter::String => match value {
                JsonValue::String(_) => Ok(value),
                JsonValue::Number(n) => Ok(JsonValue::String(n.to_string())),
                JsonValue::Bool(b) => Ok(JsonValue::String(b.to_string())),
                other => Err(format!("expected string, got {}", other)),
            },
            BuiltinAdapter::Boolean => match value {
                JsonValue::Bool(_) => Ok(value),
                JsonValue::String(ref s) => s
                    .parse::<bool>()
                    .map(JsonValue::Bool)
                    .map_err(|_| format!("expected boolean, got {:?}", s)),
                other => Err(format!("expected boolean, got {}", other)),
            },
            BuiltinAdapter::Int => {
                let n = integer(&value)?;
                i32::try_from(n)
                    .map(JsonValue::from)
                    .map_err(|_| format!("{} is out of range for Int", n))
            }
            BuiltinAdapter::Long => integer(&value).map(JsonValue::from),
            BuiltinAdapter::Float | BuiltinAdapter::Double => {
                let n = float(&value)?;
                Number::from_f64(n)
                    .map(JsonValue::Number)
                    .ok_or_else(|| format!("{} is not a finite number", n))
            }
            BuiltinAdapter::Map => match value {
                JsonValue::Object(_) => Ok(value),
                other => Err(format!("expected object, got {}", other)),
            },
            BuiltinAdapter::List => match value {
                JsonValue::Array(_) => Ok(value),
                other => Err(format!("expected list, got {}", other)),
            },
        }
    }
}

const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

fn integer(value: &JsonValue) -> Result<i64, String> {
    match value {
        JsonValue::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Ok(i),
            (None, Some(f)) if f.is_finite() && f.fract() == 0.0 => {
                // 2^63 is the first float past i64::MAX.
                if (-I64_LIMIT..I64_LIMIT).contains(&f) {
                    Ok(f as i64)
                } else {
                    Err(format!("{} does not fit in 64 bits", n))
                }
            }
            _ => Err(format!("{} is not an integer", n)),
        },
        JsonValue::String(s) => s
            .parse::<i64>()
            .map_err(|_| format!("{:?} is not an integer", s)),
        other => Err(format!("expected integer, got {}", other)),
    }
}

fn float(value: &JsonValue) -> Result<f64, String> {
    match value {
        JsonValue::Number(n) => n.as_f64().ok_or_else(|| format!("{} is not a number", n)),
        JsonValue::String(s) => s
            .parse::<f64>()
            .map_err(|_| format!("{:?} is not a number", s)),
        other => Err(format!("expected number, got {}", other)),
    }
}

/// Adapters keyed by scalar type id.
#[derive(Clone)]
pub struct ScalarAdapterRegistry {
    adapters: HashMap<String, Arc<dyn ScalarAdapter>>,
}

impl ScalarAdapterRegistry {
    /// Registry holding only the built-in adapters.
    pub fn new() -> Self {
        let mut registry = Self {
            adapters: HashMap::new(),
        };
        let builtins = [
            ("String", BuiltinAdapter::String),
            ("ID", BuiltinAdapter::String),
            ("Boolean", BuiltinAdapter::Boolean),
            ("Int", BuiltinAdapter::Int),
            ("Long", BuiltinAdapter::Long),
            ("Float", BuiltinAdapter::Float),
            ("Double", BuiltinAdapter::Double),
            ("Map", BuiltinAdapter::Map),
            ("List", BuiltinAdapter::List),
        ];
        for (type_id, adapter) in builtins {
            registry.register(type_id, Arc::new(adapter));
        }
        registry
    }

    /// Register (or replace) the adapter for `type_id`.
    pub fn register(&mut self, type_id: impl Into<String>, adapter: Arc<dyn ScalarAdapter>) {
        self.adapters.insert(type_id.into(), adapter);
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.adapters.contains_key(type_id)
    }

    /// Decode a value of type `type_id` read at `path`.
    ///
    /// Null passes through untouched. Types without an adapter pass through
    /// unchanged.
    pub fn decode(&self, type_id: &str, path: &str, value: JsonValue) -> QuiverResult<JsonValue> {
        if value.is_null() {
            return Ok(value);
        }
        let Some(adapter) = self.adapters.get(type_id) else {
            return Ok(value);
        };
        adapter.decode(value).map_err(|reason| {
            DecodeError::InvalidScalar {
                scalar: type_id.to_string(),
                path: path.to_string(),
                reason,
            }
            .into()
        })
    }

    /// Encode a canonical value of type `type_id` to its wire form.
    pub fn encode(&self, type_id: &str, path: &str, value: JsonValue) -> QuiverResult<JsonValue> {
        if value.is_null() {
            return Ok(value);
        }
        let Some(adapter) = self.adapters.get(type_id) else {
            return Ok(value);
        };
        adapter.encode(value).map_err(|reason| {
            DecodeError::InvalidScalar {
                scalar: type_id.to_string(),
                path: path.to_string(),
                reason,
            }
            .into()
        })
    }
}

impl Default for ScalarAdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ScalarAdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&String> = self.adapters.keys().collect();
        types.sort();
        f.debug_struct("ScalarAdapterRegistry")
            .field("types", &types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuiverError;
    use serde_json::json;

    struct UppercaseAdapter;

    impl ScalarAdapter for UppercaseAdapter {
        fn decode(&self, value: JsonValue) -> Result<JsonValue, String> {
            value
                .as_str()
                .map(|s| JsonValue::String(s.to_uppercase()))
                .ok_or_else(|| "expected string".to_string())
        }
    }

    #[test]
    fn test_builtin_lenient_decoding() {
        let registry = ScalarAdapterRegistry::new();
        assert_eq!(registry.decode("Int", "p", json!("42")).unwrap(), json!(42));
        assert_eq!(registry.decode("Int", "p", json!(42.0)).unwrap(), json!(42));
        assert_eq!(registry.decode("Boolean", "p", json!("true")).unwrap(), json!(true));
        assert_eq!(registry.decode("ID", "p", json!(2001)).unwrap(), json!("2001"));
        assert_eq!(registry.decode("Double", "p", json!("1.5")).unwrap(), json!(1.5));
        assert_eq!(registry.decode("Long", "p", json!(9_000_000_000_i64)).unwrap(), json!(9_000_000_000_i64));
        assert_eq!(registry.decode("Long", "p", json!(-4.0e18)).unwrap(), json!(-4_000_000_000_000_000_000_i64));
    }

    #[test]
    fn test_builtin_rejects_invalid_values() {
        let registry = ScalarAdapterRegistry::new();
        let err = registry
            .decode("Int", "QUERY_ROOT.hero.age", json!(9_000_000_000_i64))
            .unwrap_err();
        match err {
            QuiverError::Decode(DecodeError::InvalidScalar { scalar, path, .. }) => {
                assert_eq!(scalar, "Int");
                assert_eq!(path, "QUERY_ROOT.hero.age");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(registry.decode("Map", "p", json!([1])).is_err());
        assert!(registry.decode("Long", "p", json!(1e20)).is_err());
        assert!(registry.decode("Long", "p", json!(u64::MAX)).is_err());
        assert!(registry.decode("Long", "p", json!(-1e19)).is_err());
        assert!(registry.decode("Long", "p", json!(2.5)).is_err());
        assert!(registry.decode("Boolean", "p", json!("yes")).is_err());
    }

    #[test]
    fn test_null_and_unknown_types_pass_through() {
        let registry = ScalarAdapterRegistry::new();
        assert_eq!(registry.decode("Int", "p", JsonValue::Null).unwrap(), JsonValue::Null);
        assert_eq!(
            registry.decode("DateTime", "p", json!("2024-01-01")).unwrap(),
            json!("2024-01-01")
        );
    }

    #[test]
    fn test_custom_adapter_registration() {
        let mut registry = ScalarAdapterRegistry::new();
        registry.register("Shout", Arc::new(UppercaseAdapter));
        assert!(registry.contains("Shout"));
        assert_eq!(registry.decode("Shout", "p", json!("hi")).unwrap(), json!("HI"));
        assert_eq!(registry.encode("Shout", "p", json!("HI")).unwrap(), json!("HI"));
    }
}
