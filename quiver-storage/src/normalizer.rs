//! Response normalizer
//!
//! One recursive reader serves both directions. On the write path it walks
//! a decoded payload through [`MapFieldValueResolver`], producing the typed
//! JSON tree plus the flat records to merge. On the read path it walks the
//! store through [`GraphFieldValueResolver`] and produces the same tree.
//! Both record every `"recordKey.fieldKey"` they touch.

use quiver_core::{
    CacheKey, CacheKeyResolver, DecodeError, FieldKeyCodec, FieldKind, FieldValue, QuiverError,
    QuiverResult, Record, RecordSet, ResponseField, ScalarAdapterRegistry, Variables,
};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeSet;

use crate::resolver::{FieldValueResolver, GraphFieldValueResolver, MapFieldValueResolver, RawValue};
use crate::store::RecordSource;

/// Output of normalizing a network payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// The payload data as read through the field schema (decoded scalars).
    pub data: Map<String, JsonValue>,
    pub records: RecordSet,
    pub dependent_keys: BTreeSet<String>,
}

/// Output of a complete read from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead {
    pub data: Map<String, JsonValue>,
    pub dependent_keys: BTreeSet<String>,
}

/// Outcome of reading an operation back from the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreRead {
    /// Every selected field was present.
    Complete(CacheRead),
    /// The read stopped at a missing field. The keys cover everything read
    /// up to and including the missing field.
    Incomplete { dependent_keys: BTreeSet<String> },
}

impl StoreRead {
    pub fn dependent_keys(&self) -> &BTreeSet<String> {
        match self {
            StoreRead::Complete(read) => &read.dependent_keys,
            StoreRead::Incomplete { dependent_keys } => dependent_keys,
        }
    }

    pub fn into_complete(self) -> Option<CacheRead> {
        match self {
            StoreRead::Complete(read) => Some(read),
            StoreRead::Incomplete { .. } => None,
        }
    }
}

/// State threaded through one pass.
#[derive(Debug, Default)]
struct ReadContext {
    /// Records under construction; `None` on the read path.
    records: Option<RecordSet>,
    dependent_keys: BTreeSet<String>,
}

impl ReadContext {
    fn writing() -> Self {
        Self {
            records: Some(RecordSet::new()),
            dependent_keys: BTreeSet::new(),
        }
    }

    fn reading() -> Self {
        Self::default()
    }

    fn is_writing(&self) -> bool {
        self.records.is_some()
    }
}

/// Reads responses through a field schema for one set of variables.
pub struct ResponseNormalizer<'a> {
    codec: FieldKeyCodec,
    scalars: &'a ScalarAdapterRegistry,
    variables: &'a Variables,
}

impl<'a> ResponseNormalizer<'a> {
    pub fn new(codec: FieldKeyCodec, scalars: &'a ScalarAdapterRegistry, variables: &'a Variables) -> Self {
        Self {
            codec,
            scalars,
            variables,
        }
    }

    /// Normalize payload `data` rooted at `root_key`.
    ///
    /// Fails on the first decode error; nothing is returned for a partial
    /// pass, so a failing payload never reaches the store.
    pub fn normalize(
        &self,
        root_key: &CacheKey,
        fields: &[ResponseField],
        data: &Map<String, JsonValue>,
        key_resolver: &dyn CacheKeyResolver,
    ) -> QuiverResult<Normalized> {
        let resolver = MapFieldValueResolver::new(key_resolver);
        let mut ctx = ReadContext::writing();
        let output = self.read_object(&resolver, &mut ctx, &data, root_key, fields, "")?;
        Ok(Normalized {
            data: output,
            records: ctx.records.unwrap_or_default(),
            dependent_keys: ctx.dependent_keys,
        })
    }

    /// Read the data for `fields` back from `source`.
    ///
    /// Returns `Ok(None)` when the store does not hold every selected field
    /// (a cache miss). Only storage failures and unresolved variables under
    /// the strict policy are errors.
    pub fn read(
        &self,
        root_key: &CacheKey,
        fields: &[ResponseField],
        source: &dyn RecordSource,
        key_resolver: &dyn CacheKeyResolver,
    ) -> QuiverResult<Option<CacheRead>> {
        self.read_tracked(root_key, fields, source, key_resolver)
            .map(StoreRead::into_complete)
    }

    /// Like [`read`](Self::read), but a miss keeps the keys it touched, so
    /// a caller can wait for exactly the data that was missing.
    pub fn read_tracked(
        &self,
        root_key: &CacheKey,
        fields: &[ResponseField],
        source: &dyn RecordSource,
        key_resolver: &dyn CacheKeyResolver,
    ) -> QuiverResult<StoreRead> {
        let resolver = GraphFieldValueResolver::new(source, key_resolver, self.codec, self.variables);
        let root = source
            .read_record(root_key)?
            .unwrap_or_else(|| Record::new(root_key.clone()));
        let mut ctx = ReadContext::reading();
        match self.read_object(&resolver, &mut ctx, &root, root_key, fields, "") {
            Ok(data) => Ok(StoreRead::Complete(CacheRead {
                data,
                dependent_keys: ctx.dependent_keys,
            })),
            Err(QuiverError::Decode(DecodeError::UnresolvedVariable { name })) => {
                Err(DecodeError::UnresolvedVariable { name }.into())
            }
            Err(QuiverError::Decode(reason)) => {
                tracing::debug!(root = %root_key, reason = %reason, "Cache miss");
                Ok(StoreRead::Incomplete {
                    dependent_keys: ctx.dependent_keys,
                })
            }
            Err(other) => Err(other),
        }
    }

    fn read_object<R: FieldValueResolver>(
        &self,
        resolver: &R,
        ctx: &mut ReadContext,
        container: &R::Container,
        key: &CacheKey,
        fields: &[ResponseField],
        path: &str,
    ) -> QuiverResult<Map<String, JsonValue>> {
        let mut out = Map::new();
        for field in fields {
            if !field.is_included(self.variables) {
                continue;
            }
            match &field.kind {
                FieldKind::Fragment(conditions) => {
                    let typename = resolver.typename(container);
                    for condition in conditions.iter().filter(|c| c.matches(typename.as_deref())) {
                        let merged = self.read_object(resolver, ctx, container, key, &condition.fields, path)?;
                        merge_selection(&mut out, merged);
                    }
                }
                FieldKind::InlineFragment(conditions) => {
                    let typename = resolver.typename(container);
                    let mut matched: Option<Map<String, JsonValue>> = None;
                    for condition in conditions.iter().filter(|c| c.matches(typename.as_deref())) {
                        let nested_path = join(path, &field.response_name);
                        let nested = self.read_object(resolver, ctx, container, key, &condition.fields, &nested_path)?;
                        merge_selection(matched.get_or_insert_with(Map::new), nested);
                    }
                    out.insert(
                        field.response_name.clone(),
                        matched.map(JsonValue::Object).unwrap_or(JsonValue::Null),
                    );
                }
                _ => {
                    let field_key = self.codec.field_key(field, self.variables)?;
                    let field_path = join(path, &field.response_name);
                    ctx.dependent_keys.insert(key.dependent_key(&field_key));

                    let raw = match resolver.value_for(container, field, &field_key, &field_path)? {
                        // Absent optional payload fields are stored as null.
                        RawValue::Missing if ctx.is_writing() && field.optional => RawValue::Null,
                        raw => raw,
                    };
                    let (value, stored) = self.read_value(
                        resolver,
                        ctx,
                        raw,
                        field,
                        &field.kind,
                        key.child(&field_key),
                        &field_path,
                        field.optional,
                    )?;
                    if let Some(records) = ctx.records.as_mut() {
                        records.entry(key).set(field_key, stored);
                    }
                    out.insert(field.response_name.clone(), value);
                }
            }
        }
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    fn read_value<R: FieldValueResolver>(
        &self,
        resolver: &R,
        ctx: &mut ReadContext,
        raw: RawValue<R::Container>,
        field: &ResponseField,
        kind: &FieldKind,
        structural: CacheKey,
        path: &str,
        nullable: bool,
    ) -> QuiverResult<(JsonValue, FieldValue)> {
        match raw {
            RawValue::Missing => Err(DecodeError::MissingField {
                path: path.to_string(),
            }
            .into()),
            RawValue::Null if nullable => Ok((JsonValue::Null, FieldValue::Null)),
            RawValue::Null => Err(DecodeError::NullField {
                path: path.to_string(),
            }
            .into()),
            RawValue::Scalar(value) => {
                let type_id = match kind {
                    FieldKind::Scalar(scalar) => scalar.type_id(),
                    FieldKind::Custom(type_id) => type_id.as_str(),
                    _ => return Err(shape_error(path, "object")),
                };
                let decoded = self.scalars.decode(type_id, path, value.clone())?;
                // The wire form is stored so every read decodes it the same way.
                Ok((decoded, FieldValue::from_scalar(value)))
            }
            RawValue::Object(object) => {
                let FieldKind::Object(selection) = kind else {
                    return Err(shape_error(path, "scalar"));
                };
                let nested_key = resolver.key_for(field, &object, structural);
                let data = self.read_object(resolver, ctx, &object, &nested_key, selection, path)?;
                Ok((JsonValue::Object(data), FieldValue::Reference(nested_key)))
            }
            RawValue::List(items) => {
                let FieldKind::List(item) = kind else {
                    return Err(shape_error(path, "scalar"));
                };
                let mut values = Vec::with_capacity(items.len());
                let mut stored = Vec::with_capacity(items.len());
                for (i, element) in items.into_iter().enumerate() {
                    let (value, entry) = self.read_value(
                        resolver,
                        ctx,
                        element,
                        field,
                        item,
                        structural.element(i),
                        &format!("{}.{}", path, i),
                        true,
                    )?;
                    values.push(value);
                    stored.push(entry);
                }
                Ok((JsonValue::Array(values), FieldValue::List(stored)))
            }
        }
    }
}

/// Fold a fragment's output into the enclosing selection. Objects selected
/// by both sides merge field by field, as do same-length lists of objects.
fn merge_selection(into: &mut Map<String, JsonValue>, from: Map<String, JsonValue>) {
    for (name, value) in from {
        match value {
            JsonValue::Object(nested) => match into.get_mut(&name) {
                Some(JsonValue::Object(existing)) => merge_selection(existing, nested),
                _ => {
                    into.insert(name, JsonValue::Object(nested));
                }
            },
            JsonValue::Array(items) => match into.get_mut(&name) {
                Some(JsonValue::Array(existing)) if existing.len() == items.len() => {
                    for (slot, item) in existing.iter_mut().zip(items) {
                        match (slot, item) {
                            (JsonValue::Object(existing), JsonValue::Object(nested)) => {
                                merge_selection(existing, nested)
                            }
                            (slot, item) => *slot = item,
                        }
                    }
                }
                _ => {
                    into.insert(name, JsonValue::Array(items));
                }
            },
            other => {
                into.insert(name, other);
            }
        }
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

fn shape_error(path: &str, expected: &str) -> QuiverError {
    DecodeError::UnexpectedShape {
        path: path.to_string(),
        expected: expected.to_string(),
    }
    .into()
}
