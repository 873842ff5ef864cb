use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use crate::collection::CollectionDefinition;
use crate::common::{
    DEFAULT_CACHE_CAPACITY, DEFAULT_HOST, DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_LOCK_TTL_MS, DEFAULT_PORT,
};
use crate::errors::{ErrorKind, MemDbError, MemDbResult};
use crate::lock::RetryPolicy;
use crate::shard::ShardDescriptor;

/// Backend the shards persist committed documents to.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct BackendConfig {
    pub engine: String,
    pub url: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            engine: "memory".to_string(),
            url: None,
        }
    }
}

/// Address of the shared locking service.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct LockingConfig {
    pub host: String,
    pub port: u16,
    pub db: u32,
}

impl Default for LockingConfig {
    fn default() -> Self {
        LockingConfig {
            host: DEFAULT_HOST.to_string(),
            port: 6379,
            db: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct ShardConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_string(),
        }
    }
}

impl LogConfig {
    pub fn level_filter(&self) -> MemDbResult<log::LevelFilter> {
        self.level.parse::<log::LevelFilter>().map_err(|_| {
            log::error!("Unknown log level {}", self.level);
            MemDbError::new(
                &format!("Unknown log level {}", self.level),
                ErrorKind::ConfigError,
            )
        })
    }
}

/// Configuration of a whole cluster: backend, locking service, collection
/// schemas and the static shard list.
///
/// ```json
/// {
///   "backend": { "engine": "memory" },
///   "collections": {
///     "player": { "indexes": [ { "keys": ["areaId"] } ] }
///   },
///   "shards": {
///     "s1": { "host": "127.0.0.1", "port": 31017 },
///     "s2": { "host": "127.0.0.1", "port": 31018 }
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub backend: BackendConfig,
    pub locking: LockingConfig,
    pub collections: BTreeMap<String, CollectionDefinition>,
    pub shards: BTreeMap<String, ShardConfig>,
    pub log: LogConfig,
    pub idle_timeout_ms: u64,
    pub lock_ttl_ms: u64,
    pub lock_retry: RetryPolicy,
    pub cache_capacity: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            backend: BackendConfig::default(),
            locking: LockingConfig::default(),
            collections: BTreeMap::new(),
            shards: BTreeMap::new(),
            log: LogConfig::default(),
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            lock_ttl_ms: DEFAULT_LOCK_TTL_MS,
            lock_retry: RetryPolicy::default(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl ClusterConfig {
    pub fn new() -> Self {
        ClusterConfig::default()
    }

    /// A cluster of one shard listening on the default address.
    pub fn single_shard(id: &str) -> Self {
        let mut config = ClusterConfig::default();
        config.shards.insert(
            id.to_string(),
            ShardConfig {
                host: DEFAULT_HOST.to_string(),
                port: DEFAULT_PORT,
            },
        );
        config
    }

    pub fn from_json(text: &str) -> MemDbResult<Self> {
        let config: ClusterConfig = serde_json::from_str(text).map_err(|e| {
            log::error!("Invalid cluster configuration: {}", e);
            MemDbError::new(
                &format!("Invalid cluster configuration: {}", e),
                ErrorKind::ConfigError,
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> MemDbResult<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            log::error!("Cannot read configuration {}: {}", path.as_ref().display(), e);
            MemDbError::new(
                &format!("Cannot read configuration {}: {}", path.as_ref().display(), e),
                ErrorKind::ConfigError,
            )
        })?;
        ClusterConfig::from_json(&text)
    }

    pub fn with_shard(mut self, id: &str, host: &str, port: u16) -> Self {
        self.shards.insert(
            id.to_string(),
            ShardConfig {
                host: host.to_string(),
                port,
            },
        );
        self
    }

    pub fn with_collection(mut self, name: &str, definition: CollectionDefinition) -> Self {
        self.collections.insert(name.to_string(), definition);
        self
    }

    pub fn with_collections(mut self, collections: BTreeMap<String, CollectionDefinition>) -> Self {
        self.collections.extend(collections);
        self
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    /// Idle timeout of the connections opened from this config; `None`
    /// when `idle_timeout_ms` is `0`.
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Descriptors of every configured shard, ordered by id.
    pub fn shard_descriptors(&self) -> Vec<ShardDescriptor> {
        self.shards
            .iter()
            .map(|(id, shard)| ShardDescriptor::new(id, &shard.host, shard.port))
            .collect()
    }

    pub fn shard_descriptor(&self, id: &str) -> Option<ShardDescriptor> {
        self.shards
            .get(id)
            .map(|shard| ShardDescriptor::new(id, &shard.host, shard.port))
    }

    pub fn validate(&self) -> MemDbResult<()> {
        if self.backend.engine != "memory" {
            return Err(config_error(&format!(
                "Unsupported backend engine {}",
                self.backend.engine
            )));
        }
        if self.shards.is_empty() {
            return Err(config_error("At least one shard must be configured"));
        }
        if self.lock_ttl_ms == 0 {
            return Err(config_error("lock_ttl_ms must be positive"));
        }
        if self.lock_retry.window_ms == 0 {
            return Err(config_error("lock_retry.window_ms must be positive"));
        }

        let mut addresses = HashSet::new();
        for (id, shard) in &self.shards {
            if id.is_empty() {
                return Err(config_error("Shard id cannot be empty"));
            }
            if !addresses.insert((shard.host.as_str(), shard.port)) {
                return Err(config_error(&format!(
                    "Shard {} reuses address {}:{}",
                    id, shard.host, shard.port
                )));
            }
        }

        for (name, definition) in &self.collections {
            definition.validate(name)?;
        }
        self.log.level_filter()?;
        Ok(())
    }
}

/// Options of a single connection.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Milliseconds without activity before the connection closes itself;
    /// `0` disables the check.
    pub idle_timeout: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT_MS,
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: &str, port: u16) -> Self {
        ConnectionConfig {
            host: host.to_string(),
            port,
            ..ConnectionConfig::default()
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout_ms: u64) -> Self {
        self.idle_timeout = idle_timeout_ms;
        self
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn config_error(message: &str) -> MemDbError {
    log::error!("{}", message);
    MemDbError::new(message, ErrorKind::ConfigError)
}
