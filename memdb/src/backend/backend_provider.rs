use std::ops::Deref;
use std::sync::Arc;

use crate::collection::{Document, IndexDefinition};
use crate::errors::MemDbResult;

/// Persistent document store behind the shards.
///
/// Every call is atomic on its own; calls are never linked into a larger
/// transaction. Documents reach the provider with escaped keys.
pub trait BackendProvider: Send + Sync {
    fn find_by_id(&self, collection: &str, id: &str) -> MemDbResult<Option<Document>>;

    /// Returns the documents whose fields equal every `(path, value)` pair
    /// of `query`.
    fn find(&self, collection: &str, query: &Document) -> MemDbResult<Vec<Document>>;

    /// Inserts a new document.
    ///
    /// Fails with `DuplicateKey` when the `_id` exists or a unique index
    /// would admit a duplicate.
    fn insert(&self, collection: &str, document: Document) -> MemDbResult<()>;

    /// Replaces the stored document with the same id. Returns false if
    /// there was none.
    fn update(&self, collection: &str, id: &str, document: Document) -> MemDbResult<bool>;

    /// Inserts or replaces the document with the given id.
    fn upsert(&self, collection: &str, id: &str, document: Document) -> MemDbResult<()>;

    /// Removes the document with the given id. Returns false if there was none.
    fn remove(&self, collection: &str, id: &str) -> MemDbResult<bool>;

    /// Declares an index, building it over existing documents.
    fn ensure_index(&self, collection: &str, index: &IndexDefinition) -> MemDbResult<()>;

    fn drop_collection(&self, collection: &str) -> MemDbResult<()>;

    /// Removes every collection while keeping declared indexes.
    fn flush(&self) -> MemDbResult<()>;
}

#[derive(Clone)]
pub struct Backend {
    inner: Arc<dyn BackendProvider>,
}

impl Backend {
    pub fn new<T: BackendProvider + 'static>(inner: T) -> Self {
        Backend { inner: Arc::new(inner) }
    }
}

impl Deref for Backend {
    type Target = Arc<dyn BackendProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
