use parking_lot::{Mutex, MutexGuard};
use std::fmt::Debug;
use std::sync::{Arc, Weak};

use crate::backend::BackendAdapter;
use crate::collection::{Collection, Document, FindOptions, IndexDefinition, Modifier, Selector};
use crate::common::Value;
use crate::errors::{ErrorKind, MemDbError, MemDbResult};
use crate::lock::{document_lock_key, index_lock_key, Lease};
use crate::shard::Shard;
use crate::store::{WorkingSet, WorkingSetEntry};
use crate::transaction::core::{TransactionCore, UndoStep};
use crate::transaction::TransactionState;

/// A transaction on one shard.
///
/// Reads lock the document before returning it and record it in the
/// working set; writes only touch the working set until [commit]. Commit
/// flushes dirty documents in last-modified order and undoes the applied
/// writes if any of them fails. Every lock is released when the
/// transaction ends, either way.
///
/// Transactions are normally driven by `transaction(|tx| ...)` on a
/// connection, which commits on `Ok` and rolls back on `Err`.
///
/// [commit]: Transaction::commit
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    pub(crate) fn new(id: u64, shard: Shard) -> Self {
        Transaction {
            inner: Arc::new(TransactionInner {
                id,
                shard,
                core: Mutex::new(TransactionCore::new()),
                abort_reason: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub(crate) fn downgrade(&self) -> WeakTransaction {
        WeakTransaction {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn state(&self) -> TransactionState {
        self.inner.core.lock().state
    }

    pub fn shard(&self) -> &Shard {
        &self.inner.shard
    }

    pub fn shard_id(&self) -> &str {
        self.inner.shard.id()
    }

    /// Handle to a collection bound to this transaction.
    pub fn collection(&self, name: &str) -> Collection {
        Collection::bound(name, self.clone())
    }

    /// Number of documents touched so far.
    pub fn touched(&self) -> usize {
        self.inner.core.lock().working_set.len()
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// * `InvalidOperation` if the transaction is not active.
    /// * `DuplicateKey` when the working set violates a unique index.
    /// * `LockLost` when a lock expired or moved to another owner.
    /// * the backend error of a failed write.
    ///
    /// On every error the transaction is rolled back before returning.
    pub fn commit(&self) -> MemDbResult<()> {
        let mut core = self.inner.core.lock();
        self.inner.ensure_active(&core)?;

        if let Err(e) = self.inner.check_usable() {
            drop(core);
            self.rollback_quietly();
            return Err(e);
        }

        core.state = TransactionState::Committing;
        match self.inner.perform_commit(&core.working_set) {
            Ok(_) => {
                let shard = &self.inner.shard;
                for entry in core.working_set.dirty_entries() {
                    shard
                        .cache()
                        .put(entry.collection(), entry.id(), entry.current().cloned());
                }
                core.state = TransactionState::Committed;
                let leases = core.working_set.clear();
                drop(core);

                self.inner.release_all(&leases);
                shard.manager().finish(self.inner.id);
                log::debug!("Transaction {} committed on shard {}", self.inner.id, shard.id());
                Ok(())
            }
            Err(e) => {
                core.state = TransactionState::RollingBack;
                let leases = core.working_set.clear();
                core.state = TransactionState::RolledBack;
                drop(core);

                self.inner.release_all(&leases);
                self.inner.shard.manager().finish(self.inner.id);
                log::debug!("Transaction {} rolled back on commit failure: {}", self.inner.id, e);
                Err(e)
            }
        }
    }

    /// Discards the working set and releases every lock. Rolling back a
    /// finished transaction does nothing.
    pub fn rollback(&self) -> MemDbResult<()> {
        self.inner.rollback()
    }

    pub(crate) fn rollback_quietly(&self) {
        if let Err(e) = self.rollback() {
            log::warn!("Failed to release locks of transaction {}: {}", self.inner.id, e);
        }
    }

    /// Marks the transaction as failed. Its next operation, or its commit,
    /// fails with `reason`.
    pub(crate) fn abort(&self, reason: MemDbError) {
        let mut abort_reason = self.inner.abort_reason.lock();
        if abort_reason.is_none() {
            log::debug!("Transaction {} aborted: {}", self.inner.id, reason);
            *abort_reason = Some(reason);
        }
    }

    /// Extends every lease held by the transaction. Skipped while the
    /// transaction is busy committing.
    pub(crate) fn renew_leases(&self) -> MemDbResult<()> {
        let leases = match self.inner.core.try_lock() {
            Some(core) if core.state == TransactionState::Active => core.working_set.leases(),
            _ => return Ok(()),
        };

        let shard = &self.inner.shard;
        for lease in &leases {
            if let Err(e) = shard.locks().renew(lease, shard.lock_ttl()) {
                self.abort(e.clone());
                return Err(e);
            }
        }
        Ok(())
    }

    pub(crate) fn find(
        &self,
        collection: &str,
        selector: Selector,
        options: &FindOptions,
    ) -> MemDbResult<Vec<Document>> {
        let selector = selector.normalize()?;
        let query = match &selector {
            Selector::Id(id) => {
                return match self.inner.lock_document(collection, id)? {
                    Some(document) => Ok(vec![options.project(document)?]),
                    None => Ok(Vec::new()),
                };
            }
            Selector::Query(query) => query,
        };

        let shard = &self.inner.shard;
        let definition = shard.definition(collection);
        selector.resolve_index(collection, &definition)?;

        let mut ids: Vec<String> = Vec::new();
        for candidate in shard.adapter().find(collection, query, &FindOptions::new())? {
            if let Some(id) = candidate.id() {
                if !ids.iter().any(|known| known == id) {
                    ids.push(id.to_string());
                }
            }
        }
        {
            let core = self.inner.core.lock();
            for entry in core.working_set.documents(collection) {
                if let Some(current) = entry.current() {
                    if selector.matches(current)? && !ids.iter().any(|known| known == entry.id()) {
                        ids.push(entry.id().to_string());
                    }
                }
            }
        }

        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            // the committed candidate may have changed before the lock was taken
            if let Some(document) = self.inner.lock_document(collection, &id)? {
                if selector.matches(&document)? {
                    found.push(options.project(document)?);
                }
            }
        }
        Ok(found)
    }

    pub(crate) fn insert(&self, collection: &str, mut document: Document) -> MemDbResult<String> {
        let id = document.ensure_id()?;
        if self.inner.lock_document(collection, &id)?.is_some() {
            log::error!("Document {} already exists in {}", id, collection);
            return Err(MemDbError::new(
                &format!("Document {} already exists in {}", id, collection),
                ErrorKind::DuplicateKey,
            ));
        }
        self.inner.stage_checked(collection, &id, document)?;
        Ok(id)
    }

    pub(crate) fn update(
        &self,
        collection: &str,
        selector: Selector,
        modifier: &Modifier,
    ) -> MemDbResult<usize> {
        let mut count = 0;
        for document in self.find(collection, selector, &FindOptions::new())? {
            let id = match document.id() {
                Some(id) => id.to_string(),
                None => continue,
            };
            let updated = modifier.apply(&document)?;
            self.inner.stage_checked(collection, &id, updated)?;
            count += 1;
        }
        Ok(count)
    }

    pub(crate) fn remove(&self, collection: &str, selector: Selector) -> MemDbResult<usize> {
        let mut count = 0;
        for document in self.find(collection, selector, &FindOptions::new())? {
            if let Some(id) = document.id() {
                let mut core = self.inner.lock_core()?;
                core.working_set.stage(collection, id, None);
                count += 1;
            }
        }
        Ok(count)
    }

    pub(crate) fn upsert(
        &self,
        collection: &str,
        selector: Selector,
        modifier: &Modifier,
    ) -> MemDbResult<usize> {
        let selector = selector.normalize()?;
        let updated = self.update(collection, selector.clone(), modifier)?;
        if updated > 0 {
            return Ok(updated);
        }

        let document = modifier.apply(&selector.seed_document()?)?;
        self.insert(collection, document)?;
        Ok(1)
    }
}

impl Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("shard", &self.inner.shard.id())
            .field("state", &self.state())
            .finish()
    }
}

/// Handle that does not keep a transaction alive.
#[derive(Clone)]
pub(crate) struct WeakTransaction {
    inner: Weak<TransactionInner>,
}

impl WeakTransaction {
    pub(crate) fn upgrade(&self) -> Option<Transaction> {
        self.inner.upgrade().map(|inner| Transaction { inner })
    }
}

struct TransactionInner {
    id: u64,
    shard: Shard,
    core: Mutex<TransactionCore>,
    abort_reason: Mutex<Option<MemDbError>>,
}

impl Drop for TransactionInner {
    fn drop(&mut self) {
        if self.core.get_mut().state == TransactionState::Active {
            log::debug!("Transaction {} dropped while active, rolling back", self.id);
            if let Err(e) = self.rollback() {
                log::warn!("Failed to release locks of transaction {}: {}", self.id, e);
            }
        }
    }
}

impl TransactionInner {
    fn rollback(&self) -> MemDbResult<()> {
        let mut core = self.core.lock();
        if core.state != TransactionState::Active {
            return Ok(());
        }

        core.state = TransactionState::RollingBack;
        let leases = core.working_set.clear();
        core.state = TransactionState::RolledBack;
        drop(core);

        let mut failure = None;
        for lease in &leases {
            if let Err(e) = self.shard.locks().release(lease) {
                failure.get_or_insert(e);
            }
        }
        self.shard.manager().finish(self.id);
        log::debug!("Transaction {} rolled back on shard {}", self.id, self.shard.id());

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn ensure_active(&self, core: &TransactionCore) -> MemDbResult<()> {
        if core.state == TransactionState::Active {
            return Ok(());
        }
        if let Some(reason) = self.abort_reason.lock().clone() {
            return Err(reason);
        }
        log::error!("Transaction {} is {:?}", self.id, core.state);
        Err(MemDbError::new(
            &format!("Transaction {} is no longer active", self.id),
            ErrorKind::InvalidOperation,
        ))
    }

    fn check_usable(&self) -> MemDbResult<()> {
        if let Some(reason) = self.abort_reason.lock().clone() {
            return Err(reason);
        }
        if !self.shard.is_running() {
            log::error!("Shard {} is not running", self.shard.id());
            return Err(MemDbError::new(
                &format!("Connection to shard {} lost", self.shard.id()),
                ErrorKind::ConnectionLost,
            ));
        }
        Ok(())
    }

    fn lock_core(&self) -> MemDbResult<MutexGuard<'_, TransactionCore>> {
        let core = self.core.lock();
        self.ensure_active(&core)?;
        self.check_usable()?;
        Ok(core)
    }

    /// Locks a document and returns its value as this transaction sees it.
    fn lock_document(&self, collection: &str, id: &str) -> MemDbResult<Option<Document>> {
        if let Some(current) = self.lock_core()?.working_set.load(collection, id) {
            return Ok(current.cloned());
        }

        let key = document_lock_key(collection, id);
        let lease = self.shard.locks().acquire(&key, self.shard.lock_ttl())?;
        let loaded = self.load_committed(collection, id, &lease);

        let mut core = match self.lock_core() {
            Ok(core) => core,
            Err(e) => {
                self.release_all(&[lease]);
                return Err(e);
            }
        };
        let original = match loaded {
            Ok(original) => original,
            Err(e) => {
                drop(core);
                self.release_all(&[lease]);
                return Err(e);
            }
        };
        core.working_set.add(collection, id, original.clone(), lease);
        Ok(original)
    }

    fn load_committed(&self, collection: &str, id: &str, lease: &Lease) -> MemDbResult<Option<Document>> {
        let cache = self.shard.cache();
        if lease.previous_owner.as_deref() != Some(self.shard.id()) {
            cache.invalidate(collection, id);
        } else if let Some(cached) = cache.get(collection, id) {
            return Ok(cached);
        }

        let document = self.shard.adapter().find_by_id(collection, id)?;
        cache.put(collection, id, document.clone());
        Ok(document)
    }

    /// Locks the unique index tuples of `document`, checks them against
    /// staged and committed documents and stages the document.
    fn stage_checked(&self, collection: &str, id: &str, document: Document) -> MemDbResult<()> {
        let definition = self.shard.definition(collection);
        for index in definition.unique_indexes() {
            if let Some(tuple) = index.tuple(&document)? {
                self.lock_index_tuple(collection, index, &tuple)?;
            }
        }

        let mut core = self.lock_core()?;
        self.verify_unique(&core.working_set, collection, id, &document)?;
        core.working_set.stage(collection, id, Some(document));
        Ok(())
    }

    fn lock_index_tuple(&self, collection: &str, index: &IndexDefinition, tuple: &[Value]) -> MemDbResult<()> {
        let key = index_lock_key(collection, &index.name(), &IndexDefinition::tuple_key(tuple));
        if self.lock_core()?.working_set.has_index_lease(&key) {
            return Ok(());
        }

        let lease = self.shard.locks().acquire(&key, self.shard.lock_ttl())?;
        match self.lock_core() {
            Ok(mut core) => {
                core.working_set.add_index_lease(lease);
                Ok(())
            }
            Err(e) => {
                self.release_all(&[lease]);
                Err(e)
            }
        }
    }

    fn verify_unique(
        &self,
        working_set: &WorkingSet,
        collection: &str,
        id: &str,
        document: &Document,
    ) -> MemDbResult<()> {
        let definition = self.shard.definition(collection);
        for index in definition.unique_indexes() {
            let tuple = match index.tuple(document)? {
                Some(tuple) => tuple,
                None => continue,
            };

            for entry in working_set.documents(collection) {
                if entry.id() == id {
                    continue;
                }
                if let Some(current) = entry.current() {
                    if index.tuple(current)?.as_ref() == Some(&tuple) {
                        return Err(duplicate_key(collection, index, &tuple));
                    }
                }
            }

            let mut query = Document::new();
            for (key, value) in index.keys().iter().zip(tuple.iter()) {
                query.insert_raw(key.clone(), value.clone());
            }
            for committed in self.shard.adapter().find(collection, &query, &FindOptions::new())? {
                match committed.id() {
                    Some(other) if other != id && !working_set.contains(collection, other) => {
                        return Err(duplicate_key(collection, index, &tuple));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn perform_commit(&self, working_set: &WorkingSet) -> MemDbResult<()> {
        let dirty = working_set.dirty_entries();
        for entry in &dirty {
            if let Some(document) = entry.current() {
                self.verify_unique(working_set, entry.collection(), entry.id(), document)?;
            }
        }

        for lease in working_set.leases() {
            self.shard.locks().renew(&lease, self.shard.lock_ttl())?;
        }

        let mut vacated = Vec::with_capacity(dirty.len());
        for entry in &dirty {
            vacated.push(self.releases_unique_tuple(entry)?);
        }
        let mut steps = Vec::with_capacity(dirty.len() + vacated.len());
        for (entry, vacate) in dirty.iter().zip(&vacated) {
            if *vacate {
                steps.push((*entry, FlushStep::Vacate));
            }
        }
        for (entry, vacate) in dirty.iter().zip(&vacated) {
            // a vacated removal is already complete
            if !(*vacate && entry.current().is_none()) {
                steps.push((*entry, FlushStep::Write { vacated: *vacate }));
            }
        }

        let adapter = self.shard.adapter();
        let mut undo_stack: Vec<UndoStep> = Vec::with_capacity(steps.len());
        for (entry, step) in &steps {
            match flush_entry(adapter, entry, step) {
                Ok(Some(undo)) => undo_stack.push(undo),
                Ok(None) => {}
                Err(e) => {
                    log::error!(
                        "Transaction {} failed to write {}:{}, undoing {} writes",
                        self.id,
                        entry.collection(),
                        entry.id(),
                        undo_stack.len()
                    );
                    for undo in undo_stack.iter().rev() {
                        if let Err(undo_error) = undo.apply(adapter) {
                            log::error!("Failed to undo {:?}: {}", undo, undo_error);
                        }
                    }
                    // cached values of undone writes are no longer trusted
                    for entry in &dirty {
                        self.shard.cache().invalidate(entry.collection(), entry.id());
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// True when committing `entry` takes a committed document off one of
    /// its unique index tuples. Such documents leave the backend before any
    /// other write so that tuples can move between documents.
    fn releases_unique_tuple(&self, entry: &WorkingSetEntry) -> MemDbResult<bool> {
        let original = match entry.original() {
            Some(original) => original,
            None => return Ok(false),
        };
        let definition = self.shard.definition(entry.collection());
        for index in definition.unique_indexes() {
            let before = index.tuple(original)?;
            if before.is_none() {
                continue;
            }
            let after = match entry.current() {
                Some(current) => index.tuple(current)?,
                None => None,
            };
            if before != after {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn release_all(&self, leases: &[Lease]) {
        for lease in leases {
            if let Err(e) = self.shard.locks().release(lease) {
                log::warn!("Failed to release lock {}: {}", lease.key, e);
            }
        }
    }
}

enum FlushStep {
    /// Removes the committed document ahead of the ordered writes.
    Vacate,
    /// Writes the final value; a vacated document is written back as new.
    Write { vacated: bool },
}

fn flush_entry(
    adapter: &BackendAdapter,
    entry: &WorkingSetEntry,
    step: &FlushStep,
) -> MemDbResult<Option<UndoStep>> {
    let collection = entry.collection().to_string();
    let id = entry.id().to_string();
    let original = match step {
        FlushStep::Vacate => {
            let original = match entry.original() {
                Some(original) => original.clone(),
                None => return Ok(None),
            };
            if !adapter.remove(&collection, &id)? {
                return Ok(None);
            }
            return Ok(Some(UndoStep::Restore {
                collection,
                id,
                document: original,
            }));
        }
        FlushStep::Write { vacated: true } => None,
        FlushStep::Write { vacated: false } => entry.original(),
    };

    match (original, entry.current()) {
        (None, Some(document)) => {
            adapter.insert(&collection, document)?;
            Ok(Some(UndoStep::Remove { collection, id }))
        }
        (Some(original), Some(document)) => {
            if original == document {
                return Ok(None);
            }
            if !adapter.update(&collection, &id, document)? {
                adapter.insert(&collection, document)?;
                return Ok(Some(UndoStep::Remove { collection, id }));
            }
            Ok(Some(UndoStep::Restore {
                collection,
                id,
                document: original.clone(),
            }))
        }
        (Some(original), None) => {
            if !adapter.remove(&collection, &id)? {
                return Ok(None);
            }
            Ok(Some(UndoStep::Restore {
                collection,
                id,
                document: original.clone(),
            }))
        }
        (None, None) => Ok(None),
    }
}

fn duplicate_key(collection: &str, index: &IndexDefinition, tuple: &[Value]) -> MemDbError {
    let tuple_key = IndexDefinition::tuple_key(tuple);
    log::error!("Duplicate key {} for unique index {} on {}", tuple_key, index.name(), collection);
    MemDbError::new(
        &format!(
            "Duplicate key {} for unique index {} on {}",
            tuple_key,
            index.name(),
            collection
        ),
        ErrorKind::DuplicateKey,
    )
}
