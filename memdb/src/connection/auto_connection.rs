use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::collection::Collection;
use crate::config::{ClusterConfig, ConnectionConfig};
use crate::connection::{Connection, ConnectionEventListener};
use crate::errors::{ErrorKind, MemDbError, MemDbResult};
use crate::shard::{ShardConnector, ShardDescriptor};
use crate::transaction::Transaction;

/// Routes transactions to per-shard connections.
///
/// Created either for one shard address ([`AutoConnection::connect`]) or
/// for every shard of a cluster config ([`AutoConnection::auto_connect`]).
/// Connections are opened on first use and reopened when they were lost,
/// so a caller never handles reconnects itself.
///
/// ```rust,ignore
/// let autoconn = AutoConnection::auto_connect(Arc::new(cluster), &config)?;
/// let player = autoconn.collection("player");
/// autoconn.transaction(|_| player.insert(doc! { _id: "p1" }), Some("s1"))?;
/// autoconn.close()?;
/// ```
#[derive(Clone)]
pub struct AutoConnection {
    inner: Arc<AutoConnectionInner>,
}

impl AutoConnection {
    /// Connects to the single shard listening on `config.host:config.port`.
    pub fn connect(connector: Arc<dyn ShardConnector>, config: &ConnectionConfig) -> MemDbResult<Self> {
        let connection = Connection::open(
            connector.clone(),
            ShardDescriptor::address(&config.host, config.port),
            config.idle_timeout(),
        )?;
        let descriptor = connection.descriptor();

        let inner = AutoConnectionInner::new(
            connector,
            BTreeMap::from([(descriptor.id().to_string(), descriptor.clone())]),
            config.idle_timeout(),
        );
        inner.connections.insert(descriptor.id().to_string(), connection);
        Ok(AutoConnection {
            inner: Arc::new(inner),
        })
    }

    /// Prepares a connection for every shard in `config`. Nothing is
    /// connected until a transaction targets a shard.
    pub fn auto_connect(connector: Arc<dyn ShardConnector>, config: &ClusterConfig) -> MemDbResult<Self> {
        config.validate()?;
        let shards = config
            .shard_descriptors()
            .into_iter()
            .map(|descriptor| (descriptor.id().to_string(), descriptor))
            .collect();
        Ok(AutoConnection {
            inner: Arc::new(AutoConnectionInner::new(connector, shards, config.idle_timeout())),
        })
    }

    pub fn shard_ids(&self) -> Vec<String> {
        self.inner.shards.keys().cloned().collect()
    }

    /// A collection that runs on whichever transaction is bound to the
    /// current thread.
    pub fn collection(&self, name: &str) -> Collection {
        Collection::ambient(name, None)
    }

    /// The connection to `shard_id`, opened or reopened as needed.
    pub fn connection(&self, shard_id: &str) -> MemDbResult<Connection> {
        self.inner.ensure_open()?;
        let descriptor = self.inner.descriptor(Some(shard_id))?;
        self.inner.connection(descriptor)
    }

    /// Runs `f` in a transaction on `shard_id`. The shard id may be left
    /// out when only one shard is known.
    ///
    /// # Errors
    ///
    /// `UnknownShard` before anything runs when the shard id is not
    /// configured. Errors from `f` are returned unchanged after the
    /// transaction rolls back.
    pub fn transaction<T, E, F>(&self, f: F, shard_id: Option<&str>) -> Result<T, E>
    where
        F: FnOnce(&Transaction) -> Result<T, E>,
        E: From<MemDbError>,
    {
        self.inner.ensure_open()?;
        let descriptor = self.inner.descriptor(shard_id)?;
        let connection = self.inner.connection(descriptor)?;
        connection.transaction(f)
    }

    /// Registers a listener on every connection, including the ones opened
    /// later.
    pub fn subscribe(&self, listener: ConnectionEventListener) -> MemDbResult<()> {
        for connection in self.inner.connections.iter() {
            connection.subscribe(listener.clone())?;
        }
        self.inner.listeners.lock().push(listener);
        Ok(())
    }

    /// Closes every connection. Later transactions fail with
    /// `ConnectionLost`.
    pub fn close(&self) -> MemDbResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let connections: Vec<Connection> = self
            .inner
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for connection in connections {
            connection.close()?;
        }
        self.inner.connections.clear();
        log::debug!("Auto connection closed");
        Ok(())
    }
}

struct AutoConnectionInner {
    connector: Arc<dyn ShardConnector>,
    shards: BTreeMap<String, ShardDescriptor>,
    idle_timeout: Option<Duration>,
    connections: DashMap<String, Connection>,
    listeners: Mutex<Vec<ConnectionEventListener>>,
    closed: AtomicBool,
}

impl AutoConnectionInner {
    fn new(
        connector: Arc<dyn ShardConnector>,
        shards: BTreeMap<String, ShardDescriptor>,
        idle_timeout: Option<Duration>,
    ) -> Self {
        AutoConnectionInner {
            connector,
            shards,
            idle_timeout,
            connections: DashMap::new(),
            listeners: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> MemDbResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            log::error!("Auto connection is closed");
            return Err(MemDbError::new(
                "Auto connection is closed",
                ErrorKind::ConnectionLost,
            ));
        }
        Ok(())
    }

    fn descriptor(&self, shard_id: Option<&str>) -> MemDbResult<ShardDescriptor> {
        let found = match shard_id {
            Some(id) => self.shards.get(id),
            None if self.shards.len() == 1 => self.shards.values().next(),
            None => {
                log::error!("Shard id is required with {} shards", self.shards.len());
                return Err(MemDbError::new(
                    "Shard id is required when more than one shard is configured",
                    ErrorKind::UnknownShard,
                ));
            }
        };

        found.cloned().ok_or_else(|| {
            let id = shard_id.unwrap_or_default();
            log::error!("Shard {} is not configured", id);
            MemDbError::new(
                &format!("Shard {} is not configured", id),
                ErrorKind::UnknownShard,
            )
        })
    }

    fn connection(&self, descriptor: ShardDescriptor) -> MemDbResult<Connection> {
        let connection = match self.connections.entry(descriptor.id().to_string()) {
            Entry::Occupied(occupied) => occupied.get().clone(),
            Entry::Vacant(vacant) => {
                let connection = Connection::open(self.connector.clone(), descriptor, self.idle_timeout)?;
                for listener in self.listeners.lock().iter() {
                    connection.subscribe(listener.clone())?;
                }
                vacant.insert(connection.clone());
                return Ok(connection);
            }
        };

        if !connection.is_connected() {
            log::debug!("Reconnecting to {}", connection.descriptor());
            connection.reconnect()?;
        }
        Ok(connection)
    }
}
