//! Normalized records: the atomic unit of the store.
//!
//! A [`Record`] is a flat bag of field values keyed by canonical field keys.
//! Nested objects are never embedded; they live in their own record and are
//! linked through [`FieldValue::Reference`].

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Key of the record holding the top-level fields of a query.
pub const QUERY_ROOT_KEY: &str = "QUERY_ROOT";

/// Key of the record holding the top-level fields of a mutation.
pub const MUTATION_ROOT_KEY: &str = "MUTATION_ROOT";

// ============================================================================
// CACHE KEY
// ============================================================================

/// Normalized key identifying a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn query_root() -> Self {
        Self::new(QUERY_ROOT_KEY)
    }

    pub fn mutation_root() -> Self {
        Self::new(MUTATION_ROOT_KEY)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Structural key of a nested object that has no natural id.
    pub fn child(&self, field_key: &str) -> Self {
        Self(format!("{}.{}", self.0, field_key))
    }

    /// Structural key of the `index`-th element of a list field.
    pub fn element(&self, index: usize) -> Self {
        Self(format!("{}.{}", self.0, index))
    }

    /// The `"key.fieldKey"` string marking a dependency on one stored field.
    pub fn dependent_key(&self, field_key: &str) -> String {
        format!("{}.{}", self.0, field_key)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

// ============================================================================
// FIELD VALUE
// ============================================================================

/// A value stored in a record field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Number(Number),
    String(String),
    /// Custom-encoded scalar that is structured JSON (map and list scalars).
    Json(JsonValue),
    List(Vec<FieldValue>),
    Reference(CacheKey),
}

impl FieldValue {
    /// Convert a decoded scalar into its stored form.
    pub fn from_scalar(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => FieldValue::Null,
            JsonValue::Bool(b) => FieldValue::Boolean(b),
            JsonValue::Number(n) => FieldValue::Number(n),
            JsonValue::String(s) => FieldValue::String(s),
            other => FieldValue::Json(other),
        }
    }

    /// Convert a stored scalar back to JSON.
    ///
    /// Returns `None` for references, which have no scalar form.
    pub fn to_scalar(&self) -> Option<JsonValue> {
        match self {
            FieldValue::Null => Some(JsonValue::Null),
            FieldValue::Boolean(b) => Some(JsonValue::Bool(*b)),
            FieldValue::Number(n) => Some(JsonValue::Number(n.clone())),
            FieldValue::String(s) => Some(JsonValue::String(s.clone())),
            FieldValue::Json(v) => Some(v.clone()),
            FieldValue::List(items) => items
                .iter()
                .map(FieldValue::to_scalar)
                .collect::<Option<Vec<_>>>()
                .map(JsonValue::Array),
            FieldValue::Reference(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_reference(&self) -> Option<&CacheKey> {
        match self {
            FieldValue::Reference(key) => Some(key),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Boolean(b)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Number(n.into())
    }
}

impl From<CacheKey> for FieldValue {
    fn from(key: CacheKey) -> Self {
        FieldValue::Reference(key)
    }
}

// ============================================================================
// RECORD
// ============================================================================

/// A flat, keyed bag of fields representing one normalized entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    key: CacheKey,
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new(key: impl Into<CacheKey>) -> Self {
        Self {
            key: key.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, field_key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field_key.into(), value.into());
        self
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn field(&self, field_key: &str) -> Option<&FieldValue> {
        self.fields.get(field_key)
    }

    pub fn has_field(&self, field_key: &str) -> bool {
        self.fields.contains_key(field_key)
    }

    pub fn set(&mut self, field_key: impl Into<String>, value: FieldValue) {
        self.fields.insert(field_key.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Shallow last-write-wins merge of `other` into this record.
    ///
    /// Returns the dependent keys of every field whose value changed,
    /// including fields that did not exist before.
    pub fn merge(&mut self, other: Record) -> BTreeSet<String> {
        let mut changed = BTreeSet::new();
        for (field_key, value) in other.fields {
            let unchanged = self.fields.get(&field_key) == Some(&value);
            if !unchanged {
                changed.insert(self.key.dependent_key(&field_key));
                self.fields.insert(field_key, value);
            }
        }
        changed
    }

    /// Dependent keys of every field in this record.
    pub fn dependent_keys(&self) -> BTreeSet<String> {
        self.fields
            .keys()
            .map(|field_key| self.key.dependent_key(field_key))
            .collect()
    }

    /// Keys of every record this record points at.
    pub fn references(&self) -> Vec<&CacheKey> {
        fn collect<'a>(value: &'a FieldValue, out: &mut Vec<&'a CacheKey>) {
            match value {
                FieldValue::Reference(key) => out.push(key),
                FieldValue::List(items) => items.iter().for_each(|item| collect(item, out)),
                _ => {}
            }
        }
        let mut out = Vec::new();
        self.fields.values().for_each(|value| collect(value, &mut out));
        out
    }
}

// ============================================================================
// RECORD SET
// ============================================================================

/// Records produced by a single normalization pass, merged by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    records: BTreeMap<CacheKey, Record>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record, merging with any record already present for its key.
    pub fn merge(&mut self, record: Record) {
        match self.records.get_mut(record.key()) {
            Some(existing) => {
                existing.merge(record);
            }
            None => {
                self.records.insert(record.key().clone(), record);
            }
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<&Record> {
        self.records.get(key)
    }

    pub fn get_mut(&mut self, key: &CacheKey) -> Option<&mut Record> {
        self.records.get_mut(key)
    }

    /// Record for `key`, created empty if absent.
    pub fn entry(&mut self, key: &CacheKey) -> &mut Record {
        self.records
            .entry(key.clone())
            .or_insert_with(|| Record::new(key.clone()))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records.into_values().collect()
    }
}

impl FromIterator<Record> for RecordSet {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        let mut set = RecordSet::new();
        for record in iter {
            set.merge(record);
        }
        set
    }
}
