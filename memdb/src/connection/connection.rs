use dashmap::DashMap;
use itertools::Itertools;
use parking_lot::{Mutex, RwLock};
use std::cell::Cell;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::collection::Collection;
use crate::common::{schedule_task, MemDbEventBus, ScheduledTask, SubscriberRef, CONNECTION_CHECK_INTERVAL_MS};
use crate::connection::{ConnectionEvent, ConnectionEventInfo, ConnectionEventListener};
use crate::errors::{ErrorKind, MemDbError, MemDbResult};
use crate::shard::{Shard, ShardConnector, ShardDescriptor};
use crate::transaction::Transaction;

/// A logical connection to one shard.
///
/// Transactions run on the calling thread, and several may be in flight on
/// the same connection at once. A background check watches for the shard
/// going away and for the idle timeout; either one disconnects the
/// connection and is reported to subscribers as `ConnectionEvent`s.
///
/// ```rust,ignore
/// let connection = Connection::open(cluster, ShardDescriptor::new("s1", "127.0.0.1", 31017), None)?;
/// let id = connection.transaction(|tx| tx.collection("player").insert(doc! { name: "rain" }))?;
/// connection.close()?;
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Connects to the shard at `descriptor`. An `idle_timeout` of `None`
    /// keeps the connection open until it is closed or the shard stops.
    pub fn open(
        connector: Arc<dyn ShardConnector>,
        descriptor: ShardDescriptor,
        idle_timeout: Option<Duration>,
    ) -> MemDbResult<Connection> {
        let inner = Arc::new(ConnectionInner {
            connector,
            descriptor: RwLock::new(descriptor),
            shard: RwLock::new(None),
            event_bus: MemDbEventBus::new(),
            idle_timeout,
            last_active: Mutex::new(Instant::now()),
            in_flight: DashMap::new(),
            monitor: Mutex::new(None),
        });
        ConnectionInner::connect(&inner)?;
        Ok(Connection { inner })
    }

    /// Descriptor of the shard this connection talks to.
    pub fn descriptor(&self) -> ShardDescriptor {
        self.inner.descriptor.read().clone()
    }

    pub fn shard_id(&self) -> String {
        self.inner.descriptor.read().id().to_string()
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .shard
            .read()
            .as_ref()
            .map(|shard| shard.is_running())
            .unwrap_or(false)
    }

    /// A collection that runs on the transaction bound to the current
    /// thread, which must belong to this connection's shard.
    pub fn collection(&self, name: &str) -> Collection {
        Collection::ambient(name, Some(self.shard_id().as_str()))
    }

    /// Runs `f` in a transaction on the connected shard.
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back when it
    /// returns `Err` or panics. Errors from `f` are returned unchanged.
    ///
    /// # Errors
    ///
    /// `ConnectionLost` when the connection is closed or the shard stops
    /// before the transaction commits.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction) -> Result<T, E>,
        E: From<MemDbError>,
    {
        let shard = self.inner.connected_shard()?;
        self.inner.touch();

        let begun = Cell::new(None);
        let result = shard.transaction(|tx| {
            self.inner.in_flight.insert(tx.id(), tx.clone());
            begun.set(Some(tx.id()));
            f(tx)
        });

        if let Some(id) = begun.get() {
            self.inner.in_flight.remove(&id);
        }
        self.inner.touch();
        if !shard.is_running() {
            self.inner.check_shard();
        }
        result
    }

    /// Rolls back the transactions in flight on this connection and
    /// disconnects. A closed connection can be opened again with
    /// [`Connection::reconnect`].
    pub fn close(&self) -> MemDbResult<()> {
        let pending: Vec<Transaction> = self
            .inner
            .in_flight
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for transaction in pending {
            transaction.abort(MemDbError::new(
                &format!("Connection to {} closed", self.inner.descriptor.read()),
                ErrorKind::ConnectionLost,
            ));
            transaction.rollback_quietly();
        }
        self.inner.in_flight.clear();
        self.inner.disconnect();
        Ok(())
    }

    /// Connects again after the connection was closed or lost. Does
    /// nothing if the connection is still up.
    pub fn reconnect(&self) -> MemDbResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        ConnectionInner::connect(&self.inner)
    }

    /// Registers a listener for this connection's lifecycle events.
    pub fn subscribe(&self, listener: ConnectionEventListener) -> MemDbResult<SubscriberRef> {
        self.inner.event_bus.register(listener)
    }

    pub fn unsubscribe(&self, subscriber: SubscriberRef) -> MemDbResult<()> {
        self.inner.event_bus.deregister(subscriber)
    }

    /// Ids of the transactions currently running through this connection.
    pub fn in_flight(&self) -> Vec<u64> {
        self.inner.in_flight.iter().map(|e| *e.key()).sorted_unstable().collect()
    }
}

struct ConnectionInner {
    connector: Arc<dyn ShardConnector>,
    descriptor: RwLock<ShardDescriptor>,
    shard: RwLock<Option<Shard>>,
    event_bus: MemDbEventBus<ConnectionEventInfo, ConnectionEventListener>,
    idle_timeout: Option<Duration>,
    last_active: Mutex<Instant>,
    in_flight: DashMap<u64, Transaction>,
    monitor: Mutex<Option<ScheduledTask>>,
}

impl ConnectionInner {
    fn connect(inner: &Arc<ConnectionInner>) -> MemDbResult<()> {
        let descriptor = inner.descriptor.read().clone();
        let shard = inner.connector.connect(&descriptor)?;
        *inner.descriptor.write() = shard.descriptor().clone();
        *inner.shard.write() = Some(shard.clone());
        inner.touch();

        let weak: Weak<ConnectionInner> = Arc::downgrade(inner);
        let task = schedule_task(Duration::from_millis(CONNECTION_CHECK_INTERVAL_MS), move || {
            if let Some(inner) = weak.upgrade() {
                inner.check_shard();
                inner.check_idle();
            }
        });
        *inner.monitor.lock() = task;

        log::debug!("Connected to {}", shard.descriptor());
        inner.publish(ConnectionEvent::Connect, shard.descriptor().clone(), None);
        Ok(())
    }

    fn connected_shard(&self) -> MemDbResult<Shard> {
        let shard = self.shard.read().clone();
        match shard {
            Some(shard) if shard.is_running() => Ok(shard),
            Some(_) => {
                self.check_shard();
                Err(self.not_connected())
            }
            None => Err(self.not_connected()),
        }
    }

    fn not_connected(&self) -> MemDbError {
        let descriptor = self.descriptor.read().clone();
        log::error!("Connection to {} is not open", descriptor);
        MemDbError::new(
            &format!("Connection to {} is not open", descriptor),
            ErrorKind::ConnectionLost,
        )
    }

    fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    /// Disconnects if the shard behind the connection has stopped.
    fn check_shard(&self) {
        let lost = {
            let mut shard = self.shard.write();
            match shard.as_ref() {
                Some(current) if !current.is_running() => shard.take(),
                _ => None,
            }
        };

        if let Some(shard) = lost {
            let error = MemDbError::new(
                &format!("Connection to shard {} lost", shard.id()),
                ErrorKind::ConnectionLost,
            );
            log::warn!("{}", error);
            self.monitor.lock().take();
            self.publish(ConnectionEvent::Error, shard.descriptor().clone(), Some(error));
            self.publish(ConnectionEvent::Close, shard.descriptor().clone(), None);
        }
    }

    fn check_idle(&self) {
        let timeout = match self.idle_timeout {
            Some(timeout) => timeout,
            None => return,
        };
        if !self.in_flight.is_empty() || self.last_active.lock().elapsed() < timeout {
            return;
        }
        log::warn!(
            "Connection to {} idle for {:?}, disconnecting",
            self.descriptor.read(),
            timeout
        );
        self.disconnect();
    }

    fn disconnect(&self) {
        self.monitor.lock().take();
        let taken = self.shard.write().take();
        if let Some(shard) = taken {
            log::debug!("Disconnected from {}", shard.descriptor());
            self.publish(ConnectionEvent::Close, shard.descriptor().clone(), None);
        }
    }

    fn publish(&self, event: ConnectionEvent, shard: ShardDescriptor, error: Option<MemDbError>) {
        if let Err(e) = self
            .event_bus
            .publish(ConnectionEventInfo::new(event, shard, error))
        {
            log::warn!("Connection event listener failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use crate::{doc, val};
    use crate::shard::LocalCluster;
    use test_retry::retry;

    fn cluster() -> LocalCluster {
        let cluster = LocalCluster::new(
            ClusterConfig::new()
                .with_shard("s1", "127.0.0.1", 31017)
                .with_shard("s2", "127.0.0.1", 31018),
        )
        .unwrap();
        cluster.start_all().unwrap();
        cluster
    }

    fn record(connection: &Connection) -> Arc<Mutex<Vec<ConnectionEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        connection
            .subscribe(ConnectionEventListener::new(move |info| {
                sink.lock().push(info.event());
                Ok(())
            }))
            .unwrap();
        events
    }

    #[test]
    fn test_open_by_address_resolves_shard() {
        let cluster = cluster();
        let connection = Connection::open(
            Arc::new(cluster),
            ShardDescriptor::address("127.0.0.1", 31018),
            None,
        )
        .unwrap();
        assert!(connection.is_connected());
        assert_eq!(connection.shard_id(), "s2");
    }

    #[test]
    fn test_open_fails_when_shard_is_down() {
        let cluster = cluster();
        cluster.stop_shard("s1").unwrap();
        let err = Connection::open(
            Arc::new(cluster),
            ShardDescriptor::new("s1", "127.0.0.1", 31017),
            None,
        )
        .err()
        .unwrap();
        assert_eq!(err.kind(), &ErrorKind::ConnectionLost);
    }

    #[test]
    fn test_transaction_and_ambient_collection() {
        let cluster = cluster();
        let connection = Connection::open(
            Arc::new(cluster),
            ShardDescriptor::new("s1", "127.0.0.1", 31017),
            None,
        )
        .unwrap();

        let player = connection.collection("player");
        connection
            .transaction(|_| player.insert(doc! { _id: "p1", name: "rain" }))
            .unwrap();
        let found = connection
            .transaction(|_| player.find_by_id("p1"))
            .unwrap()
            .unwrap();
        assert_eq!(found.get("name"), Some(&val!("rain")));
        assert!(connection.in_flight().is_empty());
    }

    #[test]
    fn test_close_rolls_back_in_flight_transaction() {
        let cluster = cluster();
        let connection = Connection::open(
            Arc::new(cluster.clone()),
            ShardDescriptor::new("s1", "127.0.0.1", 31017),
            None,
        )
        .unwrap();
        let events = record(&connection);

        let result = connection.transaction(|tx| {
            tx.collection("player").insert(doc! { _id: "p1" })?;
            assert_eq!(connection.in_flight(), vec![tx.id()]);
            connection.close()?;
            tx.collection("player").insert(doc! { _id: "p2" })
        });
        assert_eq!(result.unwrap_err().kind(), &ErrorKind::ConnectionLost);
        assert!(!connection.is_connected());
        assert_eq!(*events.lock(), vec![ConnectionEvent::Close]);

        let err = connection.transaction(|_| Ok::<_, MemDbError>(())).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ConnectionLost);

        let shard = cluster.shard("s1").unwrap();
        let found = shard
            .transaction(|tx| tx.collection("player").find_by_id("p1"))
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_reconnect_after_close() {
        let cluster = cluster();
        let connection = Connection::open(
            Arc::new(cluster),
            ShardDescriptor::new("s1", "127.0.0.1", 31017),
            None,
        )
        .unwrap();
        let events = record(&connection);

        connection.close().unwrap();
        connection.reconnect().unwrap();
        assert!(connection.is_connected());
        assert_eq!(*events.lock(), vec![ConnectionEvent::Close, ConnectionEvent::Connect]);
    }

    #[test]
    #[retry]
    fn test_shard_stop_raises_error_and_close() {
        let cluster = cluster();
        let connection = Connection::open(
            Arc::new(cluster.clone()),
            ShardDescriptor::new("s1", "127.0.0.1", 31017),
            None,
        )
        .unwrap();
        let events = record(&connection);

        cluster.stop_shard("s1").unwrap();
        awaitility::at_most(Duration::from_secs(5)).until(|| events.lock().len() >= 2);
        assert_eq!(*events.lock(), vec![ConnectionEvent::Error, ConnectionEvent::Close]);
        assert!(!connection.is_connected());

        cluster.start_shard("s1").unwrap();
        connection.reconnect().unwrap();
        assert!(connection.is_connected());
    }

    #[test]
    #[retry]
    fn test_idle_timeout_disconnects() {
        let cluster = cluster();
        let connection = Connection::open(
            Arc::new(cluster),
            ShardDescriptor::new("s1", "127.0.0.1", 31017),
            Some(Duration::from_millis(50)),
        )
        .unwrap();
        let events = record(&connection);

        awaitility::at_most(Duration::from_secs(5)).until(|| !connection.is_connected());
        assert_eq!(*events.lock(), vec![ConnectionEvent::Close]);
    }
}
