use crate::backend::Backend;
use crate::collection::{Document, FindOptions, IndexDefinition};
use crate::common::{escape_document, escape_path, escape_value, unescape_document};
use crate::errors::{ErrorKind, MemDbError, MemDbResult};

/// Typed access to the backend for one shard.
///
/// Keys are escaped on the way in and unescaped on the way out, so callers
/// only ever see the field names they wrote. Provider failures surface as
/// `BackendError`, except `DuplicateKey` and `InvalidId` which keep their
/// kind.
#[derive(Clone)]
pub struct BackendAdapter {
    backend: Backend,
}

impl BackendAdapter {
    pub fn new(backend: Backend) -> Self {
        BackendAdapter { backend }
    }

    pub fn find_by_id(&self, collection: &str, id: &str) -> MemDbResult<Option<Document>> {
        let found = self
            .backend
            .find_by_id(collection, id)
            .map_err(|e| backend_error("find", collection, e))?;
        Ok(found.map(|d| unescape_document(&d)))
    }

    pub fn find(
        &self,
        collection: &str,
        query: &Document,
        options: &FindOptions,
    ) -> MemDbResult<Vec<Document>> {
        let mut escaped = Document::new();
        for (path, value) in query.iter() {
            escaped.insert_raw(escape_path(&path), escape_value(&value));
        }

        let found = self
            .backend
            .find(collection, &escaped)
            .map_err(|e| backend_error("find", collection, e))?;

        let mut documents = Vec::with_capacity(found.len());
        for document in found {
            documents.push(options.project(unescape_document(&document))?);
        }
        Ok(documents)
    }

    pub fn insert(&self, collection: &str, document: &Document) -> MemDbResult<()> {
        self.backend
            .insert(collection, escape_document(document))
            .map_err(|e| backend_error("insert", collection, e))
    }

    pub fn update(&self, collection: &str, id: &str, document: &Document) -> MemDbResult<bool> {
        self.backend
            .update(collection, id, escape_document(document))
            .map_err(|e| backend_error("update", collection, e))
    }

    pub fn upsert(&self, collection: &str, id: &str, document: &Document) -> MemDbResult<()> {
        self.backend
            .upsert(collection, id, escape_document(document))
            .map_err(|e| backend_error("upsert", collection, e))
    }

    pub fn remove(&self, collection: &str, id: &str) -> MemDbResult<bool> {
        self.backend
            .remove(collection, id)
            .map_err(|e| backend_error("remove", collection, e))
    }

    pub fn ensure_index(&self, collection: &str, index: &IndexDefinition) -> MemDbResult<()> {
        self.backend
            .ensure_index(collection, &index.escaped())
            .map_err(|e| backend_error("index", collection, e))
    }

    pub fn drop_collection(&self, collection: &str) -> MemDbResult<()> {
        self.backend
            .drop_collection(collection)
            .map_err(|e| backend_error("drop", collection, e))
    }

    pub fn flush(&self) -> MemDbResult<()> {
        self.backend
            .flush()
            .map_err(|e| backend_error("flush", "*", e))
    }
}

fn backend_error(action: &str, collection: &str, cause: MemDbError) -> MemDbError {
    match cause.kind() {
        ErrorKind::DuplicateKey | ErrorKind::InvalidId => cause,
        _ => {
            log::error!("Backend failed to {} on {}: {}", action, collection, cause);
            MemDbError::new_with_cause(
                &format!("Backend failed to {} on {}", action, collection),
                ErrorKind::BackendError,
                cause,
            )
        }
    }
}
