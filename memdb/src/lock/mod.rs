//! Distributed locking: the shared lock service and the per-shard client
//! that acquires document locks with bounded backoff.

mod lock_client;
mod lock_service;

pub use lock_client::*;
pub use lock_service::*;

/// Lock name of a document.
pub fn document_lock_key(collection: &str, id: &str) -> String {
    format!("{}{}{}", collection, crate::common::LOCK_KEY_SEPARATOR, id)
}

/// Lock name of a unique index tuple.
pub fn index_lock_key(collection: &str, index_name: &str, tuple_key: &str) -> String {
    format!(
        "{}{}index{}{}{}{}",
        collection,
        crate::common::INDEX_LOCK_SEPARATOR,
        crate::common::LOCK_KEY_SEPARATOR,
        index_name,
        crate::common::LOCK_KEY_SEPARATOR,
        tuple_key
    )
}
