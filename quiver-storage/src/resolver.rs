//! Field value resolvers
//!
//! The normalizer walks one field schema over two kinds of input: a decoded
//! network payload and the record graph in the store. A resolver hides the
//! difference by turning "the value of this field in this container" into a
//! [`RawValue`] the normalizer can descend into.

use quiver_core::{
    CacheKey, CacheKeyResolver, DecodeError, FieldKeyCodec, FieldKind, FieldValue, QuiverResult,
    Record, ResponseField, Variables, TYPENAME_FIELD,
};
use serde_json::{Map, Value as JsonValue};

use crate::store::RecordSource;

/// A field value as found in a container, before scalar decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue<C> {
    /// The container has no entry for the field (or a dangling reference).
    Missing,
    Null,
    Scalar(JsonValue),
    Object(C),
    List(Vec<RawValue<C>>),
}

/// Reads field values out of a container type.
pub trait FieldValueResolver {
    type Container;

    /// Raw value of `field` in `container`. `field_key` is the field's
    /// canonical key; `path` is its response path, used in errors.
    fn value_for(
        &self,
        container: &Self::Container,
        field: &ResponseField,
        field_key: &str,
        path: &str,
    ) -> QuiverResult<RawValue<Self::Container>>;

    /// The `__typename` of an object, if known.
    fn typename(&self, container: &Self::Container) -> Option<String>;

    /// Record key of a nested object; `structural` is its path-derived key.
    fn key_for(&self, field: &ResponseField, object: &Self::Container, structural: CacheKey) -> CacheKey;
}

// ============================================================================
// MAP RESOLVER (network payloads)
// ============================================================================

/// Resolves fields of a decoded JSON payload by response name.
pub struct MapFieldValueResolver<'a> {
    key_resolver: &'a dyn CacheKeyResolver,
}

impl<'a> MapFieldValueResolver<'a> {
    pub fn new(key_resolver: &'a dyn CacheKeyResolver) -> Self {
        Self { key_resolver }
    }

    fn convert(&self, value: &'a JsonValue, kind: &FieldKind, path: &str) -> QuiverResult<RawValue<&'a Map<String, JsonValue>>> {
        if value.is_null() {
            return Ok(RawValue::Null);
        }
        match kind {
            FieldKind::Scalar(_) | FieldKind::Custom(_) => Ok(RawValue::Scalar(value.clone())),
            FieldKind::Object(_) | FieldKind::Fragment(_) | FieldKind::InlineFragment(_) => value
                .as_object()
                .map(RawValue::Object)
                .ok_or_else(|| shape_error(path, "object")),
            FieldKind::List(item) => {
                let items = value.as_array().ok_or_else(|| shape_error(path, "list"))?;
                items
                    .iter()
                    .enumerate()
                    .map(|(i, element)| self.convert(element, item, &format!("{}.{}", path, i)))
                    .collect::<QuiverResult<Vec<_>>>()
                    .map(RawValue::List)
            }
        }
    }
}

impl<'a> FieldValueResolver for MapFieldValueResolver<'a> {
    type Container = &'a Map<String, JsonValue>;

    fn value_for(
        &self,
        container: &Self::Container,
        field: &ResponseField,
        _field_key: &str,
        path: &str,
    ) -> QuiverResult<RawValue<Self::Container>> {
        let object: &'a Map<String, JsonValue> = *container;
        match object.get(&field.response_name) {
            Some(value) => self.convert(value, &field.kind, path),
            None => Ok(RawValue::Missing),
        }
    }

    fn typename(&self, container: &Self::Container) -> Option<String> {
        container
            .get(TYPENAME_FIELD)
            .and_then(JsonValue::as_str)
            .map(str::to_string)
    }

    fn key_for(&self, field: &ResponseField, object: &Self::Container, structural: CacheKey) -> CacheKey {
        self.key_resolver
            .from_record_set(field, object)
            .unwrap_or(structural)
    }
}

// ============================================================================
// GRAPH RESOLVER (store reads)
// ============================================================================

/// Resolves fields of stored records by field key, following references.
pub struct GraphFieldValueResolver<'a> {
    source: &'a dyn RecordSource,
    key_resolver: &'a dyn CacheKeyResolver,
    codec: FieldKeyCodec,
    variables: &'a Variables,
}

impl<'a> GraphFieldValueResolver<'a> {
    pub fn new(
        source: &'a dyn RecordSource,
        key_resolver: &'a dyn CacheKeyResolver,
        codec: FieldKeyCodec,
        variables: &'a Variables,
    ) -> Self {
        Self {
            source,
            key_resolver,
            codec,
            variables,
        }
    }

    fn deref(&self, value: &FieldValue, kind: &FieldKind, path: &str) -> QuiverResult<RawValue<Record>> {
        match (value, kind) {
            (FieldValue::Null, _) => Ok(RawValue::Null),
            (FieldValue::Reference(key), FieldKind::Object(_)) => {
                Ok(match self.source.read_record(key)? {
                    Some(record) => RawValue::Object(record),
                    None => {
                        tracing::debug!(key = %key, path, "Dangling reference");
                        RawValue::Missing
                    }
                })
            }
            (FieldValue::List(items), FieldKind::List(item)) => items
                .iter()
                .enumerate()
                .map(|(i, element)| self.deref(element, item, &format!("{}.{}", path, i)))
                .collect::<QuiverResult<Vec<_>>>()
                .map(RawValue::List),
            (FieldValue::Reference(_), _) => Err(shape_error(path, "scalar")),
            (_, FieldKind::Scalar(_) | FieldKind::Custom(_)) => {
                Ok(RawValue::Scalar(value.to_scalar().unwrap_or(JsonValue::Null)))
            }
            (_, FieldKind::List(_)) => Err(shape_error(path, "list")),
            _ => Err(shape_error(path, "reference")),
        }
    }

    /// Locate an object field missing from its record through its arguments.
    fn by_arguments(&self, field: &ResponseField) -> QuiverResult<Option<Record>> {
        if field.arguments.is_empty() || !matches!(field.kind, FieldKind::Object(_)) {
            return Ok(None);
        }
        let arguments = self.codec.resolve_arguments(field, self.variables)?;
        match self.key_resolver.from_arguments(field, &arguments) {
            Some(key) => self.source.read_record(&key),
            None => Ok(None),
        }
    }
}

impl FieldValueResolver for GraphFieldValueResolver<'_> {
    type Container = Record;

    fn value_for(
        &self,
        container: &Record,
        field: &ResponseField,
        field_key: &str,
        path: &str,
    ) -> QuiverResult<RawValue<Record>> {
        match container.field(field_key) {
            Some(value) => self.deref(value, &field.kind, path),
            None => Ok(self
                .by_arguments(field)?
                .map(RawValue::Object)
                .unwrap_or(RawValue::Missing)),
        }
    }

    fn typename(&self, container: &Record) -> Option<String> {
        match container.field(TYPENAME_FIELD) {
            Some(FieldValue::String(typename)) => Some(typename.clone()),
            _ => None,
        }
    }

    fn key_for(&self, _field: &ResponseField, object: &Record, _structural: CacheKey) -> CacheKey {
        object.key().clone()
    }
}

fn shape_error(path: &str, expected: &str) -> quiver_core::QuiverError {
    DecodeError::UnexpectedShape {
        path: path.to_string(),
        expected: expected.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_core::{IdKeyResolver, PathKeyResolver, QuiverError, RecordSet};
    use serde_json::json;

    fn object(value: JsonValue) -> Map<String, JsonValue> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_map_resolver_reads_by_response_name() {
        let payload = object(json!({"mainHero": {"id": "2001"}, "count": 3}));
        let resolver = MapFieldValueResolver::new(&PathKeyResolver);
        let container = &payload;

        let hero = ResponseField::object("hero", vec![]).alias("mainHero");
        assert!(matches!(
            resolver.value_for(&container, &hero, "hero", "mainHero").unwrap(),
            RawValue::Object(_)
        ));
        assert_eq!(
            resolver
                .value_for(&container, &ResponseField::int("count"), "count", "count")
                .unwrap(),
            RawValue::Scalar(json!(3))
        );
        assert_eq!(
            resolver
                .value_for(&container, &ResponseField::int("absent"), "absent", "absent")
                .unwrap(),
            RawValue::Missing
        );
    }

    #[test]
    fn test_map_resolver_rejects_wrong_shape() {
        let payload = object(json!({"friends": {"id": "1"}}));
        let resolver = MapFieldValueResolver::new(&PathKeyResolver);
        let container = &payload;
        let field = ResponseField::object_list("friends", vec![]);
        let err = resolver
            .value_for(&container, &field, "friends", "hero.friends")
            .unwrap_err();
        assert_eq!(
            err,
            QuiverError::Decode(DecodeError::UnexpectedShape {
                path: "hero.friends".to_string(),
                expected: "list".to_string(),
            })
        );
    }

    #[test]
    fn test_map_resolver_key_falls_back_to_structural() {
        let with_id = object(json!({"id": "2001"}));
        let without_id = object(json!({"name": "x"}));
        let ids = IdKeyResolver::default();
        let resolver = MapFieldValueResolver::new(&ids);
        let field = ResponseField::object("hero", vec![]);
        let structural = CacheKey::from("QUERY_ROOT.hero");
        assert_eq!(
            resolver.key_for(&field, &&with_id, structural.clone()),
            CacheKey::from("2001")
        );
        assert_eq!(resolver.key_for(&field, &&without_id, structural.clone()), structural);
    }

    #[test]
    fn test_graph_resolver_follows_references() {
        let records: RecordSet = vec![
            Record::new("2001").with_field(
                "friends",
                FieldValue::List(vec![CacheKey::from("1000").into(), CacheKey::from("404").into()]),
            ),
            Record::new("1000").with_field("name", "Luke"),
        ]
        .into_iter()
        .collect();
        let variables = Variables::new();
        let resolver = GraphFieldValueResolver::new(&records, &PathKeyResolver, FieldKeyCodec::default(), &variables);
        let hero = records.get(&CacheKey::from("2001")).cloned().unwrap();
        let field = ResponseField::object_list("friends", vec![ResponseField::string("name")]);

        match resolver.value_for(&hero, &field, "friends", "hero.friends").unwrap() {
            RawValue::List(items) => {
                assert!(matches!(&items[0], RawValue::Object(r) if r.key().as_str() == "1000"));
                assert_eq!(items[1], RawValue::Missing);
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn test_graph_resolver_locates_by_arguments() {
        let records: RecordSet = vec![Record::new("1000").with_field("name", "Luke")]
            .into_iter()
            .collect();
        let variables = object(json!({"id": "1000"}));
        let ids = IdKeyResolver::default();
        let resolver = GraphFieldValueResolver::new(&records, &ids, FieldKeyCodec::default(), &variables);
        let field = ResponseField::object("character", vec![])
            .argument("id", quiver_core::Argument::variable("id"));

        let root = Record::new(CacheKey::query_root());
        match resolver
            .value_for(&root, &field, r#"character(id:"1000")"#, "character")
            .unwrap()
        {
            RawValue::Object(record) => assert_eq!(record.key().as_str(), "1000"),
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn test_graph_resolver_typename() {
        let records = RecordSet::new();
        let variables = Variables::new();
        let resolver = GraphFieldValueResolver::new(&records, &PathKeyResolver, FieldKeyCodec::default(), &variables);
        let droid = Record::new("2001").with_field(TYPENAME_FIELD, "Droid");
        assert_eq!(resolver.typename(&droid), Some("Droid".to_string()));
        assert_eq!(resolver.typename(&Record::new("x")), None);
    }
}
