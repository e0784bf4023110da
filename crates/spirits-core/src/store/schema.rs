//! Declarative description of the persistent database layout.
//!
//! A schema names the database, carries its version, and lists the
//! secondary indexes of the record collection. Bumping `version` makes the
//! persistent strategy rebuild the record collection on next open.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    /// Name of the database, stable across versions.
    pub name: String,
    pub version: u64,
    #[serde(default)]
    pub records: RecordCollection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCollection {
    #[serde(default)]
    pub options: CollectionOptions,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOptions {
    /// Assign keys from a generator when `put_data` gets no index.
    pub auto_increment: bool,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            auto_increment: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub key_path: KeyPath,
    #[serde(default)]
    pub options: IndexOptions,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOptions {
    pub unique: bool,
}

/// Location of an index key inside a record.
///
/// Segments separated by `.` walk nested objects (`form.url`). A compound
/// path produces an array key and only matches when every part is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    Single(String),
    Compound(Vec<String>),
}

impl DatabaseSchema {
    pub fn new(name: impl Into<String>, version: u64) -> Self {
        Self {
            name: name.into(),
            version,
            records: RecordCollection::default(),
        }
    }

    pub fn with_auto_increment(mut self, auto_increment: bool) -> Self {
        self.records.options.auto_increment = auto_increment;
        self
    }

    pub fn with_index(mut self, index: IndexDefinition) -> Self {
        self.records.indexes.push(index);
        self
    }

    pub fn index(&self, name: &str) -> Option<&IndexDefinition> {
        self.records.indexes.iter().find(|index| index.name == name)
    }
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>, key_path: impl Into<KeyPath>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            options: IndexOptions::default(),
        }
    }

    pub fn unique(mut self) -> Self {
        self.options.unique = true;
        self
    }

    /// Storage key of `record` in this index, if the record is indexable.
    pub(crate) fn entry_key(&self, record: &Value) -> Option<String> {
        self.key_path
            .evaluate(record)
            .map(|key| encode_index_key(&self.name, &key))
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        KeyPath::Single(path.to_string())
    }
}

impl From<String> for KeyPath {
    fn from(path: String) -> Self {
        KeyPath::Single(path)
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(paths: Vec<&str>) -> Self {
        KeyPath::Compound(paths.into_iter().map(str::to_string).collect())
    }
}

impl KeyPath {
    /// Extract the index key from a record.
    ///
    /// Returns `None` when a part is missing or is not a valid key
    /// (`null`, booleans and objects are never indexed).
    pub fn evaluate(&self, record: &Value) -> Option<Value> {
        match self {
            KeyPath::Single(path) => resolve_path(record, path)
                .filter(|value| is_valid_key(value))
                .cloned(),
            KeyPath::Compound(paths) => paths
                .iter()
                .map(|path| {
                    resolve_path(record, path)
                        .filter(|value| is_valid_key(value))
                        .cloned()
                })
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
        }
    }
}

/// Walk a dotted path through nested JSON objects.
pub(crate) fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, segment| current.get(segment))
}

pub(crate) fn is_valid_key(value: &Value) -> bool {
    match value {
        Value::String(_) | Value::Number(_) => true,
        Value::Array(items) => items.iter().all(is_valid_key),
        Value::Null | Value::Bool(_) | Value::Object(_) => false,
    }
}

/// Index name and compact JSON key, separated by a NUL byte.
pub(crate) fn encode_index_key(index: &str, key: &Value) -> String {
    format!("{}\u{0}{}", index, key)
}
