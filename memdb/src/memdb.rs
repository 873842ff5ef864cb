use std::sync::Arc;

use crate::config::{ClusterConfig, ConnectionConfig};
use crate::connection::{AutoConnection, Connection};
use crate::errors::{ErrorKind, MemDbError, MemDbResult};
use crate::memdb_builder::MemDbBuilder;
use crate::shard::LocalCluster;

/// A MemDB cluster hosted in this process, and the entry point for
/// connecting to it.
///
/// All clones share the same cluster.
///
/// ```rust,ignore
/// let db = MemDb::builder().shard("s1", "127.0.0.1", 31017).open()?;
/// let autoconn = db.auto_connect()?;
/// let player = autoconn.collection("player");
/// autoconn.transaction(|_| player.insert(doc! { _id: "p1", name: "rain" }), Some("s1"))?;
/// db.shutdown();
/// ```
#[derive(Clone)]
pub struct MemDb {
    inner: Arc<MemDbInner>,
}

impl MemDb {
    pub fn builder() -> MemDbBuilder {
        MemDbBuilder::new()
    }

    pub(crate) fn new(cluster: LocalCluster) -> Self {
        MemDb {
            inner: Arc::new(MemDbInner { cluster }),
        }
    }

    pub fn cluster(&self) -> &LocalCluster {
        &self.inner.cluster
    }

    pub fn config(&self) -> &ClusterConfig {
        self.inner.cluster.config()
    }

    /// Connects to the shard listening on `config.host:config.port`.
    pub fn connect(&self, config: &ConnectionConfig) -> MemDbResult<AutoConnection> {
        AutoConnection::connect(Arc::new(self.inner.cluster.clone()), config)
    }

    /// Prepares connections to every configured shard, opened on first use.
    pub fn auto_connect(&self) -> MemDbResult<AutoConnection> {
        AutoConnection::auto_connect(Arc::new(self.inner.cluster.clone()), self.config())
    }

    /// Opens a single connection to the shard with the given id.
    pub fn open_connection(&self, shard_id: &str) -> MemDbResult<Connection> {
        let descriptor = self.config().shard_descriptor(shard_id).ok_or_else(|| {
            log::error!("Shard {} is not configured", shard_id);
            MemDbError::new(
                &format!("Shard {} is not configured", shard_id),
                ErrorKind::UnknownShard,
            )
        })?;
        Connection::open(
            Arc::new(self.inner.cluster.clone()),
            descriptor,
            self.config().idle_timeout(),
        )
    }

    /// Stops every shard. Running transactions roll back with
    /// `ConnectionLost`.
    pub fn shutdown(&self) {
        self.inner.cluster.stop_all();
        log::debug!("MemDb shut down");
    }
}

struct MemDbInner {
    cluster: LocalCluster,
}
