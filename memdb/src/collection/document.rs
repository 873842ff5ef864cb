use im::OrdMap;
use smallvec::SmallVec;

use crate::common::{Value, DOC_ID, FIELD_SEPARATOR};
use crate::errors::{ErrorKind, MemDbError, MemDbResult};
use std::fmt::{Debug, Display};

type PathVec<'a> = SmallVec<[&'a str; 8]>;

/// Represents a document stored in a MemDB collection.
///
/// A document is an ordered map from field name to [Value]. Nested documents
/// are allowed, and two families of accessors are provided:
///
/// * [Document::put], [Document::get] and [Document::remove] address a single
///   top-level key *literally*, so a key may itself contain `.` or `$`.
/// * [Document::get_path], [Document::set_path] and [Document::remove_path]
///   interpret a dotted path like `"location.address.zip"` and traverse
///   embedded documents.
///
/// The `_id` field identifies a document inside its collection. It is always
/// stored as a string; integer ids are accepted and converted.
///
/// ## Persistent storage
///
/// Fields live in an `im::OrdMap`, so cloning a document is O(1) and the
/// original snapshot of a working-set entry shares structure with its
/// modified copy.
#[derive(Clone, Eq, PartialEq, Hash, Default, Ord, PartialOrd, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct Document {
    data: OrdMap<String, Value>,
}

impl Document {
    /// Creates a new empty document.
    ///
    /// ```ignore
    /// let doc = Document::new();
    /// assert!(doc.is_empty());
    /// ```
    pub fn new() -> Self {
        Document {
            data: OrdMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the number of top-level fields.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Associates `value` with the literal top-level `key`.
    ///
    /// # Errors
    ///
    /// * `ValidationError` if the key is empty.
    /// * `InvalidId` if the key is `_id` and the value is neither a non-empty
    ///   string nor an integer.
    ///
    /// ```ignore
    /// let mut doc = Document::new();
    /// doc.put("name", "Alice")?;
    /// doc.put("_id", 7)?;
    /// assert_eq!(doc.id(), Some("7"));
    /// ```
    pub fn put<T: Into<Value>>(&mut self, key: impl Into<String>, value: T) -> MemDbResult<()> {
        let key = key.into();
        if key.is_empty() {
            log::error!("Document does not support empty key");
            return Err(MemDbError::new(
                "Document does not support empty key",
                ErrorKind::ValidationError,
            ));
        }

        let value = value.into();
        let value = if key == DOC_ID {
            Value::String(normalize_id(&value)?)
        } else {
            value
        };
        self.data.insert(key, value);
        Ok(())
    }

    /// Stores a field without validating the key or the value.
    pub(crate) fn insert_raw(&mut self, key: String, value: Value) {
        self.data.insert(key, value);
    }

    /// Returns the value of the literal top-level `key`.
    ///
    /// ```ignore
    /// let doc = doc!{ "a.b": 1, a: { b: 2 } };
    /// assert_eq!(doc.get("a.b"), Some(&Value::I64(1)));
    /// ```
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Removes the literal top-level `key`, returning its old value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Returns the top-level field names in key order.
    pub fn keys(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }

    /// Returns the document id, if any.
    pub fn id(&self) -> Option<&str> {
        self.data.get(DOC_ID).and_then(|v| v.as_str())
    }

    pub fn has_id(&self) -> bool {
        self.data.contains_key(DOC_ID)
    }

    /// Sets the document id, accepting strings and integers.
    pub fn set_id<T: Into<Value>>(&mut self, id: T) -> MemDbResult<()> {
        self.put(DOC_ID, id)
    }

    /// Returns the id, generating and storing a UUID v4 when it is absent.
    pub fn ensure_id(&mut self) -> MemDbResult<String> {
        match self.data.get(DOC_ID) {
            Some(value) => {
                let id = normalize_id(value)?;
                self.data.insert(DOC_ID.to_string(), Value::String(id.clone()));
                Ok(id)
            }
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                self.data.insert(DOC_ID.to_string(), Value::String(id.clone()));
                Ok(id)
            }
        }
    }

    /// Reads the value at a dotted path.
    ///
    /// Traversal descends into embedded documents, and into arrays when a
    /// segment is a numeric index. Returns `Ok(None)` when any segment is
    /// missing or when an intermediate value cannot be traversed.
    ///
    /// # Errors
    ///
    /// `ValidationError` when the path is empty or has an empty segment.
    ///
    /// ```ignore
    /// let doc = doc!{ location: { address: { zip: 10001 } } };
    /// assert_eq!(doc.get_path("location.address.zip")?, Some(Value::I64(10001)));
    /// assert_eq!(doc.get_path("location.city")?, None);
    /// ```
    pub fn get_path(&self, path: &str) -> MemDbResult<Option<Value>> {
        let splits = split_path(path)?;
        let mut current = match self.data.get(splits[0]) {
            Some(value) => value,
            None => return Ok(None),
        };

        for segment in &splits[1..] {
            let next = match current {
                Value::Document(doc) => doc.data.get(*segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return Ok(None),
            }
        }
        Ok(Some(current.clone()))
    }

    /// Writes `value` at a dotted path, creating missing embedded documents.
    ///
    /// # Errors
    ///
    /// * `ValidationError` when the path is empty or has an empty segment.
    /// * `ValidationError` when an intermediate field exists and is not a
    ///   document.
    /// * `InvalidId` when the path is `_id` and the value is not a valid id.
    ///
    /// ```ignore
    /// let mut doc = Document::new();
    /// doc.set_path("location.address.zip", 10001)?;
    /// assert_eq!(doc.get_path("location.address.zip")?, Some(Value::I64(10001)));
    /// ```
    pub fn set_path<T: Into<Value>>(&mut self, path: &str, value: T) -> MemDbResult<()> {
        let splits = split_path(path)?;
        self.deep_put(path, &splits, value.into())
    }

    /// Removes the value at a dotted path and returns it.
    ///
    /// Removing a path that does not resolve is a no-op returning `Ok(None)`.
    pub fn remove_path(&mut self, path: &str) -> MemDbResult<Option<Value>> {
        let splits = split_path(path)?;
        Ok(self.deep_remove(&splits))
    }

    /// Returns a mutable reference to the value at a dotted path.
    pub(crate) fn get_path_mut(&mut self, path: &str) -> MemDbResult<Option<&mut Value>> {
        let splits = split_path(path)?;
        let mut current = match self.data.get_mut(splits[0]) {
            Some(value) => value,
            None => return Ok(None),
        };

        for segment in &splits[1..] {
            let next = match current {
                Value::Document(doc) => doc.data.get_mut(*segment),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Returns an iterator over owned `(key, value)` pairs in key order.
    ///
    /// ```ignore
    /// let doc = doc!{ name: "Alice", age: 30 };
    /// for (key, value) in doc.iter() {
    ///     println!("{}: {}", key, value);
    /// }
    /// ```
    pub fn iter(&self) -> DocumentIter {
        DocumentIter {
            keys: self.data.keys().cloned().collect(),
            data: self.clone(),
            index: 0,
        }
    }

    /// Converts this document into a `serde_json` object.
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }

    /// Builds a document from a `serde_json` object.
    ///
    /// # Errors
    ///
    /// `EncodingError` if `json` is not an object, or `InvalidId` if its
    /// `_id` is neither a string nor an integer.
    pub fn from_json(json: &serde_json::Value) -> MemDbResult<Document> {
        match json {
            serde_json::Value::Object(map) => {
                let mut document = Document::new();
                for (key, value) in map {
                    let value = Value::from_json(value);
                    if key == DOC_ID {
                        document.put(DOC_ID, value)?;
                    } else {
                        document.insert_raw(key.clone(), value);
                    }
                }
                Ok(document)
            }
            other => {
                log::error!("Expected a JSON object, found {}", other);
                Err(MemDbError::new(
                    &format!("Expected a JSON object, found {}", other),
                    ErrorKind::EncodingError,
                ))
            }
        }
    }

    /// Parses a JSON object text into a document.
    pub fn parse_json(text: &str) -> MemDbResult<Document> {
        let json: serde_json::Value = serde_json::from_str(text)?;
        Document::from_json(&json)
    }

    pub(crate) fn to_debug_string(&self, indent: usize) -> String {
        if self.data.is_empty() {
            return "{}".to_string();
        }

        let mut debug_string = String::new();
        debug_string.push_str("{\n");
        let indent_str = " ".repeat(indent + 2);
        for (key, value) in self.data.iter() {
            debug_string.push_str(&format!(
                "{}\"{}\": {},\n",
                indent_str,
                key,
                value.to_debug_string(indent + 2)
            ));
        }

        debug_string.pop();
        debug_string.pop();
        debug_string.push_str(&format!("\n{}}}", " ".repeat(indent)));
        debug_string
    }

    fn deep_put(&mut self, path: &str, splits: &[&str], value: Value) -> MemDbResult<()> {
        let key = splits[0];
        if splits.len() == 1 {
            return self.put(key, value);
        }

        let remaining = &splits[1..];
        match self.data.get_mut(key) {
            Some(Value::Document(nested)) => nested.deep_put(path, remaining, value),
            Some(other) => {
                log::error!("Field {} of path {} is a {}, not a document", key, path, other.type_name());
                Err(MemDbError::new(
                    &format!("Field {} exists and is not a document", path),
                    ErrorKind::ValidationError,
                ))
            }
            None => {
                let mut nested = Document::new();
                nested.deep_put(path, remaining, value)?;
                self.data.insert(key.to_string(), Value::Document(nested));
                Ok(())
            }
        }
    }

    fn deep_remove(&mut self, splits: &[&str]) -> Option<Value> {
        let key = splits[0];
        if splits.len() == 1 {
            return self.data.remove(key);
        }

        match self.data.get_mut(key) {
            Some(Value::Document(nested)) => nested.deep_remove(&splits[1..]),
            _ => None,
        }
    }
}

/// Splits a dotted path, rejecting empty paths and empty segments.
fn split_path(path: &str) -> MemDbResult<PathVec<'_>> {
    let splits: PathVec = path.split(FIELD_SEPARATOR).collect();
    if path.is_empty() || splits.iter().any(|s| s.is_empty()) {
        log::error!("Invalid field path {:?}", path);
        return Err(MemDbError::new(
            &format!("Invalid field path '{}'", path),
            ErrorKind::ValidationError,
        ));
    }
    Ok(splits)
}

/// Converts an id value to its canonical string form.
pub(crate) fn normalize_id(value: &Value) -> MemDbResult<String> {
    match value {
        Value::String(s) if !s.is_empty() => Ok(s.clone()),
        Value::I64(i) => Ok(i.to_string()),
        Value::F64(f) if f.fract() == 0.0 && f.is_finite() => Ok(format!("{}", *f as i64)),
        other => {
            log::error!("Invalid document id {}", other);
            Err(MemDbError::new(
                &format!("Invalid document id {}", other),
                ErrorKind::InvalidId,
            ))
        }
    }
}

impl Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_debug_string(0))
    }
}

impl Display for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

pub struct DocumentIter {
    keys: Vec<String>,
    data: Document,
    index: usize,
}

impl Iterator for DocumentIter {
    type Item = (String, Value);

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.keys.len() {
            let key = &self.keys[self.index];
            self.index += 1;
            if let Some(value) = self.data.data.get(key) {
                return Some((key.clone(), value.clone()));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.keys.len().saturating_sub(self.index);
        (0, Some(remaining))
    }
}

pub fn normalize(value: &str) -> String {
    value.trim_matches('"').to_string()
}

/// Creates a [Document] with JSON-like syntax.
///
/// ```rust
/// use memdb::doc;
///
/// let empty = doc!{};
///
/// let player = doc!{
///     _id: "p1",
///     name: "rain",
///     level: 0,
///     areas: ["north", "south"],
///     stats: { hp: 100, mp: (50 * 2) }
/// };
/// assert_eq!(player.id(), Some("p1"));
/// ```
#[macro_export]
macro_rules! doc {
    ({}) => {
        $crate::collection::Document::new()
    };

    () => {
        $crate::collection::Document::new()
    };

    ({ $($key:tt : $value:tt),* $(,)? }) => {
        $crate::doc!($($key : $value),*)
    };

    ($($key:tt : $value:tt),* $(,)?) => {
        {
            #[allow(unused_imports)]
            use $crate::doc_value;

            let mut doc = $crate::collection::Document::new();
            $(
                doc.put($crate::collection::normalize(stringify!($key)), $crate::doc_value!($value))
                .expect(&format!("Failed to put value {} in document", stringify!($value)));
            )*
            doc
        }
    };
}

/// Helper macro to convert values for the doc! macro.
#[macro_export]
macro_rules! doc_value {
    ({ $($key:tt : $value:tt),* $(,)? }) => {
        {
            $crate::common::Value::Document($crate::doc!{ $($key : $value),* })
        }
    };

    ([ $($value:tt),* $(,)? ]) => {
        $crate::common::Value::Array(vec![$($crate::doc_value!($value)),*])
    };

    ($value:expr) => {
        $crate::common::Value::from($value)
    };
}
