use std::path::Path;

use crate::backend::{Backend, BackendProvider, InMemoryBackend};
use crate::collection::CollectionDefinition;
use crate::config::ClusterConfig;
use crate::errors::{MemDbError, MemDbResult};
use crate::lock::{InMemoryLockService, LockService, LockServiceProvider, RetryPolicy};
use crate::memdb::MemDb;
use crate::shard::LocalCluster;

/// Builder for a [MemDb] cluster running in this process.
///
/// Configuration errors, such as an unreadable config file, are held back
/// and returned by [MemDbBuilder::open], so the builder chain itself never
/// fails.
///
/// ```rust,ignore
/// let db = MemDb::builder()
///     .shard("s1", "127.0.0.1", 31017)
///     .shard("s2", "127.0.0.1", 31018)
///     .collection("player", CollectionDefinition::new(vec![IndexDefinition::new(&["areaId"])]))
///     .lock_ttl_ms(10_000)
///     .open()?;
/// ```
#[derive(Default)]
pub struct MemDbBuilder {
    error: Option<MemDbError>,
    config: ClusterConfig,
    backend: Option<Backend>,
    lock_service: Option<LockService>,
}

impl MemDbBuilder {
    pub fn new() -> Self {
        MemDbBuilder {
            error: None,
            config: ClusterConfig::new(),
            backend: None,
            lock_service: None,
        }
    }

    /// Replaces the whole configuration. Shards and collections added
    /// before are discarded.
    pub fn config(mut self, config: ClusterConfig) -> Self {
        self.config = config;
        self
    }

    /// Loads the configuration from a JSON file.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        if self.error.is_none() {
            match ClusterConfig::from_file(path) {
                Ok(config) => self.config = config,
                Err(e) => self.error = Some(e),
            }
        }
        self
    }

    /// Loads the configuration from a JSON string.
    pub fn config_json(mut self, text: &str) -> Self {
        if self.error.is_none() {
            match ClusterConfig::from_json(text) {
                Ok(config) => self.config = config,
                Err(e) => self.error = Some(e),
            }
        }
        self
    }

    pub fn shard(mut self, id: &str, host: &str, port: u16) -> Self {
        self.config = self.config.with_shard(id, host, port);
        self
    }

    pub fn collection(mut self, name: &str, definition: CollectionDefinition) -> Self {
        self.config = self.config.with_collection(name, definition);
        self
    }

    pub fn lock_ttl_ms(mut self, lock_ttl_ms: u64) -> Self {
        self.config.lock_ttl_ms = lock_ttl_ms;
        self
    }

    pub fn lock_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.lock_retry = policy;
        self
    }

    /// Idle timeout of the connections handed out by the cluster; `0`
    /// disables it.
    pub fn idle_timeout_ms(mut self, idle_timeout_ms: u64) -> Self {
        self.config.idle_timeout_ms = idle_timeout_ms;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.config.cache_capacity = capacity;
        self
    }

    /// Stores committed documents in `backend` instead of the built-in
    /// in-memory backend.
    pub fn backend<T: BackendProvider + 'static>(mut self, backend: T) -> Self {
        self.backend = Some(Backend::new(backend));
        self
    }

    /// Uses `lock_service` instead of the built-in in-memory lock service.
    pub fn lock_service<T: LockServiceProvider + 'static>(mut self, lock_service: T) -> Self {
        self.lock_service = Some(LockService::new(lock_service));
        self
    }

    /// Validates the configuration and starts every configured shard.
    ///
    /// # Errors
    ///
    /// The first error captured while building, `ConfigError` for an
    /// invalid configuration, or the error of a shard that fails to start.
    pub fn open(self) -> MemDbResult<MemDb> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let cluster = LocalCluster::with_services(
            self.config,
            self.backend
                .unwrap_or_else(|| Backend::new(InMemoryBackend::new())),
            self.lock_service
                .unwrap_or_else(|| LockService::new(InMemoryLockService::new())),
        )?;
        cluster.start_all()?;
        Ok(MemDb::new(cluster))
    }
}
