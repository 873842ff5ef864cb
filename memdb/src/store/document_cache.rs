use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use crate::collection::Document;

type CacheKey = (String, String);

/// LRU cache of committed documents for one shard.
///
/// A cached `None` records that the document is known to be absent. The
/// cache is only trusted while this shard was the last owner of the
/// document lock; see [DocumentCache::invalidate].
pub struct DocumentCache {
    entries: Mutex<LruCache<CacheKey, Option<Document>>>,
}

impl DocumentCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        DocumentCache {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Looks up a document. The outer `None` is a cache miss.
    pub fn get(&self, collection: &str, id: &str) -> Option<Option<Document>> {
        self.entries
            .lock()
            .get(&(collection.to_string(), id.to_string()))
            .cloned()
    }

    pub fn put(&self, collection: &str, id: &str, document: Option<Document>) {
        self.entries
            .lock()
            .put((collection.to_string(), id.to_string()), document);
    }

    pub fn invalidate(&self, collection: &str, id: &str) {
        self.entries
            .lock()
            .pop(&(collection.to_string(), id.to_string()));
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
