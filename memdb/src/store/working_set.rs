use indexmap::IndexMap;

use crate::collection::Document;
use crate::lock::Lease;

type EntryKey = (String, String);

/// A document touched by a transaction.
///
/// The entry only exists while the transaction holds the document lock;
/// `original` is the committed value read under that lock.
#[derive(Clone, Debug)]
pub struct WorkingSetEntry {
    collection: String,
    id: String,
    original: Option<Document>,
    current: Option<Document>,
    dirty: bool,
    lease: Lease,
    modified_seq: u64,
}

impl WorkingSetEntry {
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn original(&self) -> Option<&Document> {
        self.original.as_ref()
    }

    pub fn current(&self) -> Option<&Document> {
        self.current.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    pub fn modified_seq(&self) -> u64 {
        self.modified_seq
    }
}

/// Documents and locks held by one transaction, in first-touch order.
#[derive(Debug, Default)]
pub struct WorkingSet {
    entries: IndexMap<EntryKey, WorkingSetEntry>,
    index_leases: IndexMap<String, Lease>,
    sequence: u64,
}

impl WorkingSet {
    pub fn new() -> Self {
        WorkingSet::default()
    }

    pub fn contains(&self, collection: &str, id: &str) -> bool {
        self.entries.contains_key(&key(collection, id))
    }

    /// Current value of a loaded document. The outer `None` means the
    /// document was never loaded by this transaction.
    pub fn load(&self, collection: &str, id: &str) -> Option<Option<&Document>> {
        self.entries
            .get(&key(collection, id))
            .map(|entry| entry.current.as_ref())
    }

    pub fn entry(&self, collection: &str, id: &str) -> Option<&WorkingSetEntry> {
        self.entries.get(&key(collection, id))
    }

    /// Records a freshly locked document. The caller must already hold
    /// `lease` for the document.
    pub fn add(&mut self, collection: &str, id: &str, original: Option<Document>, lease: Lease) {
        self.entries.insert(
            key(collection, id),
            WorkingSetEntry {
                collection: collection.to_string(),
                id: id.to_string(),
                current: original.clone(),
                original,
                dirty: false,
                lease,
                modified_seq: 0,
            },
        );
    }

    /// Replaces the current value of a loaded document and marks it dirty.
    /// Returns false if the document was never loaded.
    pub fn stage(&mut self, collection: &str, id: &str, current: Option<Document>) -> bool {
        match self.entries.get_mut(&key(collection, id)) {
            Some(entry) => entry.current = current,
            None => return false,
        }
        self.mark_dirty(collection, id)
    }

    /// Marks an entry as modified without changing its value.
    pub fn mark_dirty(&mut self, collection: &str, id: &str) -> bool {
        match self.entries.get_mut(&key(collection, id)) {
            Some(entry) => {
                self.sequence += 1;
                entry.dirty = true;
                entry.modified_seq = self.sequence;
                true
            }
            None => false,
        }
    }

    /// Dirty entries in last-modified order.
    pub fn dirty_entries(&self) -> Vec<&WorkingSetEntry> {
        let mut dirty: Vec<&WorkingSetEntry> = self.entries.values().filter(|e| e.dirty).collect();
        dirty.sort_by_key(|e| e.modified_seq);
        dirty
    }

    /// Loaded documents of a collection, with their current values.
    pub fn documents<'a>(&'a self, collection: &'a str) -> impl Iterator<Item = &'a WorkingSetEntry> + 'a {
        self.entries.values().filter(move |e| e.collection == collection)
    }

    pub fn has_index_lease(&self, key: &str) -> bool {
        self.index_leases.contains_key(key)
    }

    pub fn add_index_lease(&mut self, lease: Lease) {
        self.index_leases.insert(lease.key.clone(), lease);
    }

    /// Every lease held, document locks first.
    pub fn leases(&self) -> Vec<Lease> {
        self.entries
            .values()
            .map(|e| e.lease.clone())
            .chain(self.index_leases.values().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Empties the working set, returning the leases to release.
    pub fn clear(&mut self) -> Vec<Lease> {
        let leases = self.leases();
        self.entries.clear();
        self.index_leases.clear();
        leases
    }
}

fn key(collection: &str, id: &str) -> EntryKey {
    (collection.to_string(), id.to_string())
}
