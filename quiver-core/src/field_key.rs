//! Canonical field keys.
//!
//! A field key combines a field name with its resolved arguments in an
//! order-independent form: `hero(episode:"EMPIRE")`. The exact string is both
//! the record field name and part of structural record keys, so equal
//! logical arguments must always produce the same key.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{DecodeError, QuiverResult};
use crate::field::{variable_marker, Argument, ResponseField};
use crate::operation::Variables;

/// What to do with an argument whose variable is absent from the variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnresolvedVariablePolicy {
    /// Render the argument as `null` and keep going.
    #[default]
    Null,
    /// Fail with [`DecodeError::UnresolvedVariable`].
    Strict,
}

/// Builds canonical field keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldKeyCodec {
    policy: UnresolvedVariablePolicy,
}

impl FieldKeyCodec {
    pub fn new(policy: UnresolvedVariablePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> UnresolvedVariablePolicy {
        self.policy
    }

    /// Field key of `field` under `variables`.
    pub fn field_key(&self, field: &ResponseField, variables: &Variables) -> QuiverResult<String> {
        self.canonicalize(&field.field_name, &field.arguments, variables)
    }

    /// Canonical key for a field name and its arguments.
    pub fn canonicalize(
        &self,
        field_name: &str,
        arguments: &[(String, Argument)],
        variables: &Variables,
    ) -> QuiverResult<String> {
        if arguments.is_empty() {
            return Ok(field_name.to_string());
        }
        let resolved = self.resolve_entries(arguments, variables)?;
        let mut key = String::with_capacity(field_name.len() + 16 * arguments.len());
        key.push_str(field_name);
        key.push('(');
        write_entries(&resolved, &mut key);
        key.push(')');
        Ok(key)
    }

    /// Arguments of `field` with every variable substituted.
    pub fn resolve_arguments(
        &self,
        field: &ResponseField,
        variables: &Variables,
    ) -> QuiverResult<Map<String, JsonValue>> {
        self.resolve_entries(&field.arguments, variables)
    }

    fn resolve_entries(
        &self,
        entries: &[(String, Argument)],
        variables: &Variables,
    ) -> QuiverResult<Map<String, JsonValue>> {
        let mut map = Map::new();
        for (name, argument) in entries {
            map.insert(name.clone(), self.resolve(argument, variables)?);
        }
        Ok(map)
    }

    fn resolve(&self, argument: &Argument, variables: &Variables) -> QuiverResult<JsonValue> {
        match argument {
            Argument::Value(value) => self.resolve_json(value, variables),
            Argument::Variable(name) => self.lookup(name, variables),
            Argument::Object(entries) => self
                .resolve_entries(entries, variables)
                .map(JsonValue::Object),
            Argument::List(items) => items
                .iter()
                .map(|item| self.resolve(item, variables))
                .collect::<QuiverResult<Vec<_>>>()
                .map(JsonValue::Array),
        }
    }

    fn resolve_json(&self, value: &JsonValue, variables: &Variables) -> QuiverResult<JsonValue> {
        if let Some(name) = variable_marker(value) {
            return self.lookup(name, variables);
        }
        match value {
            JsonValue::Object(map) => {
                let mut out = Map::new();
                for (key, nested) in map {
                    out.insert(key.clone(), self.resolve_json(nested, variables)?);
                }
                Ok(JsonValue::Object(out))
            }
            JsonValue::Array(items) => items
                .iter()
                .map(|item| self.resolve_json(item, variables))
                .collect::<QuiverResult<Vec<_>>>()
                .map(JsonValue::Array),
            other => Ok(other.clone()),
        }
    }

    fn lookup(&self, name: &str, variables: &Variables) -> QuiverResult<JsonValue> {
        match variables.get(name) {
            // Variable values are plain JSON; markers inside them stay literal.
            Some(value) => Ok(value.clone()),
            None => match self.policy {
                UnresolvedVariablePolicy::Null => {
                    tracing::debug!(variable = name, "Unresolved variable in field arguments");
                    Ok(JsonValue::Null)
                }
                UnresolvedVariablePolicy::Strict => Err(DecodeError::UnresolvedVariable {
                    name: name.to_string(),
                }
                .into()),
            },
        }
    }
}

fn write_entries(map: &Map<String, JsonValue>, out: &mut String) {
    let mut entries: Vec<(&String, &JsonValue)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    for (i, (name, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(name);
        out.push(':');
        write_value(value, out);
    }
}

fn write_value(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Object(map) => {
            out.push('{');
            write_entries(map, out);
            out.push('}');
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuiverError;
    use serde_json::json;

    fn vars(value: JsonValue) -> Variables {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_no_arguments_is_field_name() {
        let codec = FieldKeyCodec::default();
        let field = ResponseField::string("name");
        assert_eq!(codec.field_key(&field, &Variables::new()).unwrap(), "name");
    }

    #[test]
    fn test_variable_resolves_like_literal() {
        let codec = FieldKeyCodec::default();
        let variables = vars(json!({"episode": "EMPIRE"}));
        let by_variable = ResponseField::object("hero", vec![])
            .argument("episode", Argument::variable("episode"));
        let by_literal = ResponseField::object("hero", vec![]).argument("episode", "EMPIRE");

        let key = codec.field_key(&by_variable, &variables).unwrap();
        assert_eq!(key, r#"hero(episode:"EMPIRE")"#);
        assert_eq!(key, codec.field_key(&by_literal, &variables).unwrap());
    }

    #[test]
    fn test_arguments_sorted_and_nested_objects_recurse() {
        let codec = FieldKeyCodec::default();
        let variables = vars(json!({"stars": 5}));
        let args = vec![
            (
                "review".to_string(),
                Argument::from_json(json!({
                    "stars": {"kind": "Variable", "variableName": "stars"},
                    "commentary": "Great"
                })),
            ),
            ("episode".to_string(), Argument::from("JEDI")),
        ];
        assert_eq!(
            codec.canonicalize("createReview", &args, &variables).unwrap(),
            r#"createReview(episode:"JEDI",review:{commentary:"Great",stars:5})"#
        );
    }

    #[test]
    fn test_variable_holding_object_is_canonicalized() {
        let codec = FieldKeyCodec::default();
        let variables = vars(json!({"filter": {"z": [1, 2], "a": {"y": true, "b": null}}}));
        let args = vec![("where".to_string(), Argument::variable("filter"))];
        assert_eq!(
            codec.canonicalize("search", &args, &variables).unwrap(),
            "search(where:{a:{b:null,y:true},z:[1,2]})"
        );
    }

    #[test]
    fn test_unresolved_variable_null_policy() {
        let codec = FieldKeyCodec::new(UnresolvedVariablePolicy::Null);
        let args = vec![("episode".to_string(), Argument::variable("episode"))];
        assert_eq!(
            codec.canonicalize("hero", &args, &Variables::new()).unwrap(),
            "hero(episode:null)"
        );
    }

    #[test]
    fn test_unresolved_variable_strict_policy() {
        let codec = FieldKeyCodec::new(UnresolvedVariablePolicy::Strict);
        let args = vec![("episode".to_string(), Argument::variable("episode"))];
        let err = codec
            .canonicalize("hero", &args, &Variables::new())
            .unwrap_err();
        assert_eq!(
            err,
            QuiverError::Decode(DecodeError::UnresolvedVariable {
                name: "episode".to_string()
            })
        );
    }

    #[test]
    fn test_variable_values_are_not_resolved_again() {
        let codec = FieldKeyCodec::new(UnresolvedVariablePolicy::Strict);
        let marker = json!({"kind": "Variable", "variableName": "x"});
        let variables = vars(json!({"x": marker.clone()}));
        let args = vec![("episode".to_string(), Argument::variable("x"))];
        assert_eq!(
            codec.canonicalize("hero", &args, &variables).unwrap(),
            r#"hero(episode:{kind:"Variable",variableName:"x"})"#
        );

        let field = ResponseField::object("hero", vec![]).argument("episode", Argument::variable("x"));
        let resolved = codec.resolve_arguments(&field, &variables).unwrap();
        assert_eq!(resolved.get("episode"), Some(&marker));
    }

    #[test]
    fn test_resolve_arguments() {
        let codec = FieldKeyCodec::default();
        let field = ResponseField::object("character", vec![]).argument("id", Argument::variable("id"));
        let resolved = codec
            .resolve_arguments(&field, &vars(json!({"id": "1000"})))
            .unwrap();
        assert_eq!(resolved.get("id"), Some(&json!("1000")));
    }
}
