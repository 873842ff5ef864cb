use std::collections::BTreeMap;

use crate::collection::Document;
use crate::common::{escape_path, Value, DOC_ID};
use crate::errors::{ErrorKind, MemDbError, MemDbResult};

/// Declares a secondary index over one or more document fields.
///
/// Indexes are sparse: a document is left out of the index when any key
/// field is missing or null, or when a key's value is listed in
/// `value_ignore` for that key. Unique indexes never admit two documents
/// with equal key tuples.
#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct IndexDefinition {
    keys: Vec<String>,
    #[serde(default)]
    unique: bool,
    #[serde(default, rename = "valueIgnore", alias = "value_ignore")]
    value_ignore: BTreeMap<String, Vec<Value>>,
}

impl IndexDefinition {
    pub fn new(keys: &[&str]) -> IndexDefinition {
        IndexDefinition {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            unique: false,
            value_ignore: BTreeMap::new(),
        }
    }

    pub fn unique(mut self) -> IndexDefinition {
        self.unique = true;
        self
    }

    /// Excludes documents whose `key` field equals any of `values`.
    pub fn ignore_values(mut self, key: &str, values: Vec<Value>) -> IndexDefinition {
        self.value_ignore.insert(key.to_string(), values);
        self
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn value_ignore(&self) -> &BTreeMap<String, Vec<Value>> {
        &self.value_ignore
    }

    /// Name of the index, the key list joined by commas.
    pub fn name(&self) -> String {
        self.keys.join(",")
    }

    /// Returns true if the query's field set is exactly this index's keys.
    pub fn covers(&self, fields: &[String]) -> bool {
        fields.len() == self.keys.len() && self.keys.iter().all(|k| fields.contains(k))
    }

    /// Extracts the key tuple of `document`, or `None` when the document is
    /// excluded from this index.
    pub fn tuple(&self, document: &Document) -> MemDbResult<Option<Vec<Value>>> {
        let mut tuple = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            let value = match document.get_path(key)? {
                Some(Value::Null) | None => return Ok(None),
                Some(value) => value,
            };
            if let Some(ignored) = self.value_ignore.get(key) {
                if ignored.contains(&value) {
                    return Ok(None);
                }
            }
            tuple.push(value);
        }
        Ok(Some(tuple))
    }

    /// Renders a key tuple as a stable string, used in lock names.
    pub fn tuple_key(tuple: &[Value]) -> String {
        let json: Vec<serde_json::Value> = tuple
            .iter()
            .map(|v| match v {
                // equal numbers must name the same lock
                Value::F64(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    serde_json::Value::from(*f as i64)
                }
                other => other.to_json(),
            })
            .collect();
        serde_json::Value::Array(json).to_string()
    }

    /// Copy of this definition with every key path escaped for the backend.
    pub(crate) fn escaped(&self) -> IndexDefinition {
        IndexDefinition {
            keys: self.keys.iter().map(|k| escape_path(k)).collect(),
            unique: self.unique,
            value_ignore: self
                .value_ignore
                .iter()
                .map(|(k, v)| (escape_path(k), v.clone()))
                .collect(),
        }
    }

    fn validate(&self, collection: &str) -> MemDbResult<()> {
        if self.keys.is_empty() {
            log::error!("Index on collection {} has no keys", collection);
            return Err(MemDbError::new(
                &format!("Index on collection {} has no keys", collection),
                ErrorKind::ConfigError,
            ));
        }
        if self.keys.iter().any(|k| k == DOC_ID) {
            log::error!("Index on collection {} cannot include {}", collection, DOC_ID);
            return Err(MemDbError::new(
                &format!("Index on collection {} cannot include {}", collection, DOC_ID),
                ErrorKind::ConfigError,
            ));
        }
        for key in self.value_ignore.keys() {
            if !self.keys.contains(key) {
                log::error!("Ignored values declared for {} which is not an index key", key);
                return Err(MemDbError::new(
                    &format!("Ignored values declared for {} which is not a key of index {}", key, self.name()),
                    ErrorKind::ConfigError,
                ));
            }
        }
        Ok(())
    }
}

/// A named collection and its ordered list of index definitions.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct CollectionDefinition {
    #[serde(default)]
    indexes: Vec<IndexDefinition>,
}

impl CollectionDefinition {
    pub fn new(indexes: Vec<IndexDefinition>) -> CollectionDefinition {
        CollectionDefinition { indexes }
    }

    pub fn indexes(&self) -> &[IndexDefinition] {
        &self.indexes
    }

    pub fn unique_indexes(&self) -> impl Iterator<Item = &IndexDefinition> {
        self.indexes.iter().filter(|i| i.is_unique())
    }

    /// Finds the index whose keys are exactly `fields`.
    pub fn index_for(&self, fields: &[String]) -> Option<&IndexDefinition> {
        self.indexes.iter().find(|i| i.covers(fields))
    }

    pub fn validate(&self, collection: &str) -> MemDbResult<()> {
        for index in &self.indexes {
            index.validate(collection)?;
        }
        Ok(())
    }
}
