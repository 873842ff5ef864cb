use std::fmt::Debug;

use crate::collection::{Document, FindOptions, Modifier, Selector};
use crate::errors::{ErrorKind, MemDbError, MemDbResult};
use crate::transaction::{current_transaction, Transaction};

#[derive(Clone)]
enum Binding {
    /// Bound to one transaction.
    Transaction(Transaction),
    /// Uses the ambient transaction of the calling thread, optionally
    /// restricted to one shard.
    Ambient(Option<String>),
}

/// A named collection seen through a transaction.
///
/// Every operation runs inside a transaction: either the one the handle was
/// obtained from (`Transaction::collection`), or the transaction running on
/// the calling thread when the handle came from a connection.
///
/// ```rust,ignore
/// connection.transaction(|tx| {
///     let players = tx.collection("player");
///     players.insert(doc! { _id: "p1", name: "rain", level: 0 })?;
///     players.update("p1", doc! { "$inc": { level: 1 } })?;
///     Ok(())
/// })?;
/// ```
#[derive(Clone)]
pub struct Collection {
    name: String,
    binding: Binding,
}

impl Collection {
    pub(crate) fn bound(name: &str, transaction: Transaction) -> Self {
        Collection {
            name: name.to_string(),
            binding: Binding::Transaction(transaction),
        }
    }

    pub(crate) fn ambient(name: &str, shard_id: Option<&str>) -> Self {
        Collection {
            name: name.to_string(),
            binding: Binding::Ambient(shard_id.map(|s| s.to_string())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finds the documents matching `selector`, locking each of them.
    ///
    /// A query must name exactly `_id` or the keys of a declared index.
    ///
    /// # Errors
    ///
    /// * `IndexNotFound` when no declared index matches the query fields.
    /// * `LockTimeout` when a document lock cannot be acquired in time.
    pub fn find<S: Into<Selector>>(&self, selector: S) -> MemDbResult<Vec<Document>> {
        self.find_with(selector, FindOptions::new())
    }

    pub fn find_with<S: Into<Selector>>(
        &self,
        selector: S,
        options: FindOptions,
    ) -> MemDbResult<Vec<Document>> {
        self.transaction()?.find(&self.name, selector.into(), &options)
    }

    /// Finds a document by id. Returns `None` if it does not exist.
    pub fn find_by_id(&self, id: &str) -> MemDbResult<Option<Document>> {
        self.find_one(id)
    }

    pub fn find_one<S: Into<Selector>>(&self, selector: S) -> MemDbResult<Option<Document>> {
        Ok(self.find(selector)?.into_iter().next())
    }

    /// Reads committed documents without locking them. The result may be
    /// stale with respect to transactions running elsewhere.
    pub fn find_read_only<S: Into<Selector>>(&self, selector: S) -> MemDbResult<Vec<Document>> {
        self.find_read_only_with(selector, FindOptions::new())
    }

    pub fn find_read_only_with<S: Into<Selector>>(
        &self,
        selector: S,
        options: FindOptions,
    ) -> MemDbResult<Vec<Document>> {
        let transaction = self.transaction()?;
        let shard = transaction.shard();
        let selector = selector.into().normalize()?;
        match &selector {
            Selector::Id(id) => match shard.adapter().find_by_id(&self.name, id)? {
                Some(document) => Ok(vec![options.project(document)?]),
                None => Ok(Vec::new()),
            },
            Selector::Query(query) => {
                selector.resolve_index(&self.name, &shard.definition(&self.name))?;
                shard.adapter().find(&self.name, query, &options)
            }
        }
    }

    pub fn find_one_read_only<S: Into<Selector>>(&self, selector: S) -> MemDbResult<Option<Document>> {
        Ok(self.find_read_only(selector)?.into_iter().next())
    }

    /// Inserts a document and returns its id. A UUID is generated when the
    /// document has no `_id`.
    ///
    /// # Errors
    ///
    /// `DuplicateKey` if the id exists or a unique index would be violated.
    pub fn insert(&self, document: Document) -> MemDbResult<String> {
        self.transaction()?.insert(&self.name, document)
    }

    pub fn insert_many(&self, documents: Vec<Document>) -> MemDbResult<Vec<String>> {
        let transaction = self.transaction()?;
        let mut ids = Vec::with_capacity(documents.len());
        for document in documents {
            ids.push(transaction.insert(&self.name, document)?);
        }
        Ok(ids)
    }

    /// Applies `modifier` to every matching document and returns how many
    /// were updated.
    ///
    /// A modifier made of `$` operators edits the document; any other
    /// modifier replaces it, keeping `_id`.
    pub fn update<S: Into<Selector>>(&self, selector: S, modifier: Document) -> MemDbResult<usize> {
        let modifier = Modifier::parse(&modifier)?;
        self.transaction()?.update(&self.name, selector.into(), &modifier)
    }

    /// Removes every matching document and returns how many were removed.
    pub fn remove<S: Into<Selector>>(&self, selector: S) -> MemDbResult<usize> {
        self.transaction()?.remove(&self.name, selector.into())
    }

    /// Updates the matching documents, or inserts one built from the
    /// selector and the modifier when nothing matches.
    pub fn upsert<S: Into<Selector>>(&self, selector: S, modifier: Document) -> MemDbResult<usize> {
        let modifier = Modifier::parse(&modifier)?;
        self.transaction()?.upsert(&self.name, selector.into(), &modifier)
    }

    fn transaction(&self) -> MemDbResult<Transaction> {
        match &self.binding {
            Binding::Transaction(transaction) => Ok(transaction.clone()),
            Binding::Ambient(shard_id) => {
                let transaction = current_transaction().ok_or_else(|| {
                    log::error!("Collection {} used outside a transaction", self.name);
                    MemDbError::new(
                        &format!("Collection {} must be used inside a transaction", self.name),
                        ErrorKind::InvalidOperation,
                    )
                })?;

                match shard_id {
                    Some(shard_id) if shard_id != transaction.shard_id() => {
                        log::error!(
                            "Collection {} of shard {} used in a transaction of shard {}",
                            self.name,
                            shard_id,
                            transaction.shard_id()
                        );
                        Err(MemDbError::new(
                            &format!(
                                "Collection {} belongs to shard {}, not {}",
                                self.name,
                                shard_id,
                                transaction.shard_id()
                            ),
                            ErrorKind::InvalidOperation,
                        ))
                    }
                    _ => Ok(transaction),
                }
            }
        }
    }
}

impl Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection").field("name", &self.name).finish()
    }
}
