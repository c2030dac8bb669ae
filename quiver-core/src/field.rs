//! Read schema: the typed field descriptions that drive normalization.
//!
//! Operations are generated elsewhere; what reaches the core is a tree of
//! [`ResponseField`]s. The same tree drives both the network decode path and
//! the cache read path, which is what makes write-then-read lossless.

use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::operation::Variables;

/// Shared, immutable selection of fields.
pub type Selection = Arc<[ResponseField]>;

/// Response name of the type discriminator field.
pub const TYPENAME_FIELD: &str = "__typename";

// ============================================================================
// FIELD KINDS
// ============================================================================

/// Built-in scalar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    String,
    Id,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    /// Enum values travel as strings.
    Enum,
}

impl ScalarKind {
    /// Identifier used to look up the scalar's adapter.
    pub fn type_id(&self) -> &'static str {
        match self {
            ScalarKind::String => "String",
            ScalarKind::Id => "ID",
            ScalarKind::Boolean => "Boolean",
            ScalarKind::Int => "Int",
            ScalarKind::Long => "Long",
            ScalarKind::Float => "Float",
            ScalarKind::Double => "Double",
            ScalarKind::Enum => "String",
        }
    }
}

/// A type-dependent branch of a fragment, selected by `__typename`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeCondition {
    /// Concrete type names this branch applies to. Empty matches any type.
    pub type_names: Vec<String>,
    pub fields: Selection,
}

impl TypeCondition {
    pub fn new<S: Into<String>>(type_names: impl IntoIterator<Item = S>, fields: Vec<ResponseField>) -> Self {
        Self {
            type_names: type_names.into_iter().map(Into::into).collect(),
            fields: fields.into(),
        }
    }

    pub fn matches(&self, typename: Option<&str>) -> bool {
        if self.type_names.is_empty() {
            return true;
        }
        typename.is_some_and(|t| self.type_names.iter().any(|n| n == t))
    }
}

/// What kind of value a field holds, matched exhaustively by the reader.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Scalar(ScalarKind),
    /// A nested object, normalized into its own record.
    Object(Selection),
    List(Box<FieldKind>),
    /// Custom scalar identified by its type name in the adapter registry.
    Custom(String),
    /// Named fragment spread: fields merge into the parent object.
    Fragment(Vec<TypeCondition>),
    /// Inline fragment: fields nest under the field's response name.
    InlineFragment(Vec<TypeCondition>),
}

// ============================================================================
// ARGUMENTS
// ============================================================================

/// A field argument value, possibly referencing an operation variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Value(JsonValue),
    Variable(String),
    Object(Vec<(String, Argument)>),
    List(Vec<Argument>),
}

impl Argument {
    pub fn variable(name: impl Into<String>) -> Self {
        Argument::Variable(name.into())
    }

    /// Convert a generated JSON argument tree, detecting variable markers of
    /// the form `{"kind": "Variable", "variableName": "x"}`.
    pub fn from_json(value: JsonValue) -> Self {
        if let Some(name) = variable_marker(&value) {
            return Argument::Variable(name.to_string());
        }
        match value {
            JsonValue::Object(map) => Argument::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Argument::from_json(v)))
                    .collect(),
            ),
            JsonValue::Array(items) => {
                Argument::List(items.into_iter().map(Argument::from_json).collect())
            }
            other => Argument::Value(other),
        }
    }
}

impl From<JsonValue> for Argument {
    fn from(value: JsonValue) -> Self {
        Argument::from_json(value)
    }
}

impl From<&str> for Argument {
    fn from(value: &str) -> Self {
        Argument::Value(JsonValue::String(value.to_string()))
    }
}

/// Name of the variable a JSON marker object refers to, if it is one.
pub fn variable_marker(value: &JsonValue) -> Option<&str> {
    let map = value.as_object()?;
    if map.get("kind").and_then(JsonValue::as_str) != Some("Variable") {
        return None;
    }
    map.get("variableName").and_then(JsonValue::as_str)
}

// ============================================================================
// CONDITIONS
// ============================================================================

/// An `@include(if: $var)` / `@skip(if: $var)` directive on a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BooleanCondition {
    pub variable_name: String,
    /// `true` for `@skip`, `false` for `@include`.
    pub inverted: bool,
}

impl BooleanCondition {
    pub fn include(variable_name: impl Into<String>) -> Self {
        Self {
            variable_name: variable_name.into(),
            inverted: false,
        }
    }

    pub fn skip(variable_name: impl Into<String>) -> Self {
        Self {
            variable_name: variable_name.into(),
            inverted: true,
        }
    }

    /// Whether the guarded field is part of the response for `variables`.
    pub fn passes(&self, variables: &Variables) -> bool {
        let value = variables
            .get(&self.variable_name)
            .and_then(JsonValue::as_bool)
            .unwrap_or(false);
        value != self.inverted
    }
}

// ============================================================================
// RESPONSE FIELD
// ============================================================================

/// One field of an operation's read schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseField {
    pub kind: FieldKind,
    /// Name in the response payload (the alias, if any).
    pub response_name: String,
    /// Name of the schema field, used for field keys.
    pub field_name: String,
    pub arguments: Vec<(String, Argument)>,
    pub optional: bool,
    pub conditions: Vec<BooleanCondition>,
}

impl ResponseField {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            kind,
            response_name: name.clone(),
            field_name: name,
            arguments: Vec::new(),
            optional: true,
            conditions: Vec::new(),
        }
    }

    pub fn scalar(name: impl Into<String>, kind: ScalarKind) -> Self {
        Self::new(name, FieldKind::Scalar(kind))
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::scalar(name, ScalarKind::String)
    }

    pub fn id(name: impl Into<String>) -> Self {
        Self::scalar(name, ScalarKind::Id)
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::scalar(name, ScalarKind::Int)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::scalar(name, ScalarKind::Boolean)
    }

    pub fn double(name: impl Into<String>) -> Self {
        Self::scalar(name, ScalarKind::Double)
    }

    pub fn typename() -> Self {
        Self::string(TYPENAME_FIELD).non_null()
    }

    pub fn custom(name: impl Into<String>, type_id: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Custom(type_id.into()))
    }

    pub fn object(name: impl Into<String>, fields: Vec<ResponseField>) -> Self {
        Self::new(name, FieldKind::Object(fields.into()))
    }

    pub fn list(name: impl Into<String>, item: FieldKind) -> Self {
        Self::new(name, FieldKind::List(Box::new(item)))
    }

    /// A list of nested objects sharing one selection.
    pub fn object_list(name: impl Into<String>, fields: Vec<ResponseField>) -> Self {
        Self::list(name, FieldKind::Object(fields.into()))
    }

    pub fn fragment(conditions: Vec<TypeCondition>) -> Self {
        Self::new(TYPENAME_FIELD, FieldKind::Fragment(conditions))
    }

    pub fn inline_fragment(name: impl Into<String>, conditions: Vec<TypeCondition>) -> Self {
        Self::new(name, FieldKind::InlineFragment(conditions))
    }

    /// Read the field under a different response name.
    pub fn alias(mut self, response_name: impl Into<String>) -> Self {
        self.response_name = response_name.into();
        self
    }

    pub fn argument(mut self, name: impl Into<String>, value: impl Into<Argument>) -> Self {
        self.arguments.push((name.into(), value.into()));
        self
    }

    pub fn non_null(mut self) -> Self {
        self.optional = false;
        self
    }

    pub fn condition(mut self, condition: BooleanCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Fragments are not stored as fields of their own.
    pub fn is_fragment(&self) -> bool {
        matches!(self.kind, FieldKind::Fragment(_))
    }

    /// Whether every `@include`/`@skip` condition lets the field through.
    pub fn is_included(&self, variables: &Variables) -> bool {
        self.conditions.iter().all(|c| c.passes(variables))
    }
}
