use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use itertools::Itertools;
use std::sync::Arc;

use crate::backend::{Backend, BackendAdapter, InMemoryBackend};
use crate::config::ClusterConfig;
use crate::errors::{ErrorKind, MemDbError, MemDbResult};
use crate::lock::{InMemoryLockService, LockService};
use crate::shard::{Shard, ShardDescriptor};

/// Opens connections to shard processes.
pub trait ShardConnector: Send + Sync {
    /// Connects to the shard at `descriptor`.
    ///
    /// # Errors
    ///
    /// `ConnectionLost` when nothing is listening there.
    fn connect(&self, descriptor: &ShardDescriptor) -> MemDbResult<Shard>;
}

/// Every shard of a cluster running in this process.
///
/// Owns the shared backend and locking service. Shards are started and
/// stopped individually, which is how tests simulate shard failures.
#[derive(Clone)]
pub struct LocalCluster {
    inner: Arc<LocalClusterInner>,
}

impl LocalCluster {
    /// Creates a cluster over an in-memory backend and lock service. No
    /// shard is started yet.
    pub fn new(config: ClusterConfig) -> MemDbResult<Self> {
        LocalCluster::with_services(
            config,
            Backend::new(InMemoryBackend::new()),
            LockService::new(InMemoryLockService::new()),
        )
    }

    pub fn with_services(
        config: ClusterConfig,
        backend: Backend,
        lock_service: LockService,
    ) -> MemDbResult<Self> {
        config.validate()?;
        Ok(LocalCluster {
            inner: Arc::new(LocalClusterInner {
                config,
                backend,
                lock_service,
                shards: DashMap::new(),
            }),
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.inner.config
    }

    /// Starts a configured shard, or returns it if it is already running.
    pub fn start_shard(&self, id: &str) -> MemDbResult<Shard> {
        let descriptor = self.inner.descriptor(id)?;
        match self.inner.shards.entry(id.to_string()) {
            Entry::Occupied(occupied) => Ok(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                let shard = Shard::start(
                    descriptor,
                    &self.inner.config,
                    self.inner.backend.clone(),
                    self.inner.lock_service.clone(),
                )?;
                vacant.insert(shard.clone());
                Ok(shard)
            }
        }
    }

    pub fn start_all(&self) -> MemDbResult<()> {
        for id in self.inner.config.shards.keys() {
            self.start_shard(id)?;
        }
        Ok(())
    }

    /// Stops a shard. Stopping a shard that is not running does nothing.
    pub fn stop_shard(&self, id: &str) -> MemDbResult<()> {
        self.inner.descriptor(id)?;
        if let Some((_, shard)) = self.inner.shards.remove(id) {
            shard.stop();
        }
        Ok(())
    }

    pub fn stop_all(&self) {
        let ids: Vec<String> = self.inner.shards.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, shard)) = self.inner.shards.remove(&id) {
                shard.stop();
            }
        }
    }

    /// The running shard with the given id.
    pub fn shard(&self, id: &str) -> Option<Shard> {
        self.inner.shards.get(id).map(|e| e.value().clone())
    }

    pub fn running_shards(&self) -> Vec<String> {
        self.inner
            .shards
            .iter()
            .map(|e| e.key().clone())
            .sorted()
            .collect()
    }

    /// Empties the backend, drops every lock and clears shard caches.
    /// Declared indexes survive.
    pub fn flush_db(&self) -> MemDbResult<()> {
        BackendAdapter::new(self.inner.backend.clone()).flush()?;
        self.inner.lock_service.clear()?;
        for shard in self.inner.shards.iter() {
            shard.cache().clear();
        }
        log::debug!("Cluster flushed");
        Ok(())
    }
}

impl ShardConnector for LocalCluster {
    fn connect(&self, descriptor: &ShardDescriptor) -> MemDbResult<Shard> {
        let id = if descriptor.has_id() {
            Some(descriptor.id().to_string())
        } else {
            self.inner
                .config
                .shards
                .iter()
                .find(|(_, shard)| shard.host == descriptor.host() && shard.port == descriptor.port())
                .map(|(id, _)| id.clone())
        };

        match id.and_then(|id| self.shard(&id)) {
            Some(shard) => Ok(shard),
            None => {
                log::error!("Nothing listening on {}", descriptor);
                Err(MemDbError::new(
                    &format!("Cannot connect to {}", descriptor),
                    ErrorKind::ConnectionLost,
                ))
            }
        }
    }
}

struct LocalClusterInner {
    config: ClusterConfig,
    backend: Backend,
    lock_service: LockService,
    shards: DashMap<String, Shard>,
}

impl LocalClusterInner {
    fn descriptor(&self, id: &str) -> MemDbResult<ShardDescriptor> {
        self.config.shard_descriptor(id).ok_or_else(|| {
            log::error!("Shard {} is not configured", id);
            MemDbError::new(
                &format!("Shard {} is not configured", id),
                ErrorKind::UnknownShard,
            )
        })
    }
}
