use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::backend::BackendProvider;
use crate::collection::{Document, IndexDefinition};
use crate::common::Value;
use crate::errors::{ErrorKind, MemDbError, MemDbResult};

struct StoredIndex {
    definition: IndexDefinition,
    entries: HashMap<Vec<Value>, BTreeSet<String>>,
}

impl StoredIndex {
    fn new(definition: IndexDefinition) -> Self {
        StoredIndex {
            definition,
            entries: HashMap::new(),
        }
    }

    fn add(&mut self, id: &str, document: &Document) -> MemDbResult<()> {
        if let Some(tuple) = self.definition.tuple(document)? {
            self.entries.entry(tuple).or_default().insert(id.to_string());
        }
        Ok(())
    }

    fn delete(&mut self, id: &str, document: &Document) -> MemDbResult<()> {
        if let Some(tuple) = self.definition.tuple(document)? {
            if let Some(ids) = self.entries.get_mut(&tuple) {
                ids.remove(id);
                if ids.is_empty() {
                    self.entries.remove(&tuple);
                }
            }
        }
        Ok(())
    }

    /// Key tuple of an equality query, or `None` when the index cannot
    /// answer it.
    fn query_tuple(&self, query: &Document) -> Option<Vec<Value>> {
        let mut tuple = Vec::with_capacity(self.definition.keys().len());
        for key in self.definition.keys() {
            let value = match query.get(key) {
                Some(Value::Null) | None => return None,
                Some(value) => value,
            };
            if let Some(ignored) = self.definition.value_ignore().get(key) {
                if ignored.contains(value) {
                    return None;
                }
            }
            tuple.push(value.clone());
        }
        Some(tuple)
    }
}

#[derive(Default)]
struct StoredCollection {
    documents: BTreeMap<String, Document>,
    indexes: Vec<StoredIndex>,
}

impl StoredCollection {
    fn check_unique(&self, collection: &str, id: &str, document: &Document) -> MemDbResult<()> {
        for index in self.indexes.iter().filter(|i| i.definition.is_unique()) {
            if let Some(tuple) = index.definition.tuple(document)? {
                let taken = index
                    .entries
                    .get(&tuple)
                    .map(|ids| ids.iter().any(|other| other != id))
                    .unwrap_or(false);
                if taken {
                    log::error!(
                        "Duplicate key {:?} for unique index {} on {}",
                        tuple,
                        index.definition.name(),
                        collection
                    );
                    return Err(MemDbError::new(
                        &format!(
                            "Duplicate key {} for unique index {} on {}",
                            IndexDefinition::tuple_key(&tuple),
                            index.definition.name(),
                            collection
                        ),
                        ErrorKind::DuplicateKey,
                    ));
                }
            }
        }
        Ok(())
    }

    fn index_add(&mut self, id: &str, document: &Document) -> MemDbResult<()> {
        for index in self.indexes.iter_mut() {
            index.add(id, document)?;
        }
        Ok(())
    }

    fn index_delete(&mut self, id: &str, document: &Document) -> MemDbResult<()> {
        for index in self.indexes.iter_mut() {
            index.delete(id, document)?;
        }
        Ok(())
    }

    fn store(&mut self, collection: &str, id: &str, mut document: Document) -> MemDbResult<()> {
        document.set_id(id)?;
        self.check_unique(collection, id, &document)?;
        if let Some(previous) = self.documents.get(id).cloned() {
            self.index_delete(id, &previous)?;
        }
        self.index_add(id, &document)?;
        self.documents.insert(id.to_string(), document);
        Ok(())
    }

    fn candidates(&self, query: &Document) -> Vec<&Document> {
        let fields = query.keys();
        let indexed = self
            .indexes
            .iter()
            .filter(|i| i.definition.covers(&fields))
            .find_map(|i| i.query_tuple(query).map(|tuple| (i, tuple)));

        match indexed {
            Some((index, tuple)) => index
                .entries
                .get(&tuple)
                .map(|ids| ids.iter().filter_map(|id| self.documents.get(id)).collect())
                .unwrap_or_default(),
            None => self.documents.values().collect(),
        }
    }
}

fn matches(document: &Document, query: &Document) -> MemDbResult<bool> {
    for (path, expected) in query.iter() {
        if document.get_path(&path)?.as_ref() != Some(&expected) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// In-process backend: a sorted map of documents per collection plus hash
/// indexes for the declared index definitions.
#[derive(Default)]
pub struct InMemoryBackend {
    collections: DashMap<String, StoredCollection>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        InMemoryBackend::default()
    }
}

impl BackendProvider for InMemoryBackend {
    fn find_by_id(&self, collection: &str, id: &str) -> MemDbResult<Option<Document>> {
        Ok(self
            .collections
            .get(collection)
            .and_then(|c| c.documents.get(id).cloned()))
    }

    fn find(&self, collection: &str, query: &Document) -> MemDbResult<Vec<Document>> {
        let stored = match self.collections.get(collection) {
            Some(stored) => stored,
            None => return Ok(Vec::new()),
        };

        let mut found = Vec::new();
        for document in stored.candidates(query) {
            if matches(document, query)? {
                found.push(document.clone());
            }
        }
        Ok(found)
    }

    fn insert(&self, collection: &str, document: Document) -> MemDbResult<()> {
        let id = match document.id() {
            Some(id) => id.to_string(),
            None => {
                log::error!("Cannot insert a document without id into {}", collection);
                return Err(MemDbError::new(
                    &format!("Cannot insert a document without id into {}", collection),
                    ErrorKind::InvalidId,
                ));
            }
        };

        let mut stored = self.collections.entry(collection.to_string()).or_default();
        if stored.documents.contains_key(&id) {
            log::error!("Duplicate id {} in {}", id, collection);
            return Err(MemDbError::new(
                &format!("Document {} already exists in {}", id, collection),
                ErrorKind::DuplicateKey,
            ));
        }
        stored.store(collection, &id, document)
    }

    fn update(&self, collection: &str, id: &str, document: Document) -> MemDbResult<bool> {
        let mut stored = match self.collections.get_mut(collection) {
            Some(stored) => stored,
            None => return Ok(false),
        };
        if !stored.documents.contains_key(id) {
            return Ok(false);
        }
        stored.store(collection, id, document)?;
        Ok(true)
    }

    fn upsert(&self, collection: &str, id: &str, document: Document) -> MemDbResult<()> {
        let mut stored = self.collections.entry(collection.to_string()).or_default();
        stored.store(collection, id, document)
    }

    fn remove(&self, collection: &str, id: &str) -> MemDbResult<bool> {
        let mut stored = match self.collections.get_mut(collection) {
            Some(stored) => stored,
            None => return Ok(false),
        };
        match stored.documents.remove(id) {
            Some(previous) => {
                stored.index_delete(id, &previous)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn ensure_index(&self, collection: &str, index: &IndexDefinition) -> MemDbResult<()> {
        let mut stored = self.collections.entry(collection.to_string()).or_default();
        if stored.indexes.iter().any(|i| &i.definition == index) {
            return Ok(());
        }

        let mut built = StoredIndex::new(index.clone());
        for (id, document) in stored.documents.iter() {
            built.add(id, document)?;
        }
        if index.is_unique() {
            if let Some((tuple, _)) = built.entries.iter().find(|(_, ids)| ids.len() > 1) {
                log::error!("Existing documents of {} violate unique index {}", collection, index.name());
                return Err(MemDbError::new(
                    &format!(
                        "Cannot build unique index {} on {}: duplicate key {}",
                        index.name(),
                        collection,
                        IndexDefinition::tuple_key(tuple)
                    ),
                    ErrorKind::DuplicateKey,
                ));
            }
        }

        stored.indexes.retain(|i| i.definition.keys() != index.keys());
        stored.indexes.push(built);
        log::debug!("Index {} ensured on {}", index.name(), collection);
        Ok(())
    }

    fn drop_collection(&self, collection: &str) -> MemDbResult<()> {
        self.collections.remove(collection);
        Ok(())
    }

    fn flush(&self) -> MemDbResult<()> {
        for mut stored in self.collections.iter_mut() {
            stored.documents.clear();
            for index in stored.indexes.iter_mut() {
                index.entries.clear();
            }
        }
        Ok(())
    }
}
