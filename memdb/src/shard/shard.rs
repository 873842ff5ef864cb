use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{Backend, BackendAdapter};
use crate::collection::CollectionDefinition;
use crate::config::ClusterConfig;
use crate::errors::{ErrorKind, MemDbError, MemDbResult};
use crate::lock::{LockClient, LockService};
use crate::shard::ShardDescriptor;
use crate::store::DocumentCache;
use crate::transaction::{run_in_transaction, Transaction, TransactionManager};

/// One shard process.
///
/// A shard owns the document cache for the documents it last locked, a lock
/// client that acts under the shard id, and the transaction manager for
/// the transactions running on it. All shards of a cluster share the
/// backend and the locking service.
#[derive(Clone)]
pub struct Shard {
    inner: Arc<ShardInner>,
}

impl Shard {
    pub(crate) fn start(
        descriptor: ShardDescriptor,
        config: &ClusterConfig,
        backend: Backend,
        lock_service: LockService,
    ) -> MemDbResult<Shard> {
        let adapter = BackendAdapter::new(backend);
        for (name, definition) in &config.collections {
            for index in definition.indexes() {
                adapter.ensure_index(name, index)?;
            }
        }

        let lock_ttl = config.lock_ttl();
        let inner = ShardInner {
            locks: LockClient::new(lock_service, descriptor.id(), config.lock_retry.clone()),
            descriptor,
            adapter,
            cache: DocumentCache::new(config.cache_capacity),
            definitions: config.collections.clone(),
            lock_ttl,
            running: AtomicBool::new(true),
            manager: TransactionManager::new(),
        };

        let renew_interval = lock_ttl / 3;
        if !renew_interval.is_zero() {
            inner.manager.start_keeper(renew_interval);
        }
        log::debug!("Shard {} started", inner.descriptor);
        Ok(Shard {
            inner: Arc::new(inner),
        })
    }

    pub fn id(&self) -> &str {
        self.inner.descriptor.id()
    }

    pub fn descriptor(&self) -> &ShardDescriptor {
        &self.inner.descriptor
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Runs `f` in a transaction on this shard.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction) -> Result<T, E>,
        E: From<MemDbError>,
    {
        run_in_transaction(self, f)
    }

    /// Begins a transaction that the caller commits or rolls back.
    pub fn begin(&self) -> MemDbResult<Transaction> {
        self.inner.manager.begin(self)
    }

    pub fn active_transactions(&self) -> Vec<u64> {
        self.inner.manager.active_transactions()
    }

    /// Names of the collections with a declared schema.
    pub fn collection_names(&self) -> Vec<String> {
        self.inner.definitions.keys().cloned().collect()
    }

    pub(crate) fn adapter(&self) -> &BackendAdapter {
        &self.inner.adapter
    }

    pub(crate) fn locks(&self) -> &LockClient {
        &self.inner.locks
    }

    pub(crate) fn cache(&self) -> &DocumentCache {
        &self.inner.cache
    }

    pub(crate) fn lock_ttl(&self) -> Duration {
        self.inner.lock_ttl
    }

    pub(crate) fn manager(&self) -> &TransactionManager {
        &self.inner.manager
    }

    /// Schema of a collection; undeclared collections have no indexes.
    pub(crate) fn definition(&self, collection: &str) -> CollectionDefinition {
        self.inner
            .definitions
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Stops the shard. Running transactions fail with `ConnectionLost` at
    /// their next operation and roll back.
    pub(crate) fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.manager.close(MemDbError::new(
            &format!("Connection to shard {} lost", self.id()),
            ErrorKind::ConnectionLost,
        ));
        self.inner.cache.clear();
        log::debug!("Shard {} stopped", self.inner.descriptor);
    }
}

impl Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("descriptor", &self.inner.descriptor)
            .field("running", &self.is_running())
            .finish()
    }
}

struct ShardInner {
    descriptor: ShardDescriptor,
    adapter: BackendAdapter,
    locks: LockClient,
    cache: DocumentCache,
    definitions: BTreeMap<String, CollectionDefinition>,
    lock_ttl: Duration,
    running: AtomicBool,
    manager: TransactionManager,
}
