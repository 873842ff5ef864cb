use anyhow::Error;
use basu::error::BasuError;
use basu::event::Event;
use basu::Handle;
use std::fmt::Debug;
use std::sync::Arc;

use crate::errors::{MemDbError, MemDbResult};
use crate::shard::ShardDescriptor;

/// Lifecycle events of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection reached its shard
    Connect,
    /// The shard went away; the event carries the error
    Error,
    /// The connection was closed, by the caller, by the idle timeout or
    /// after an error
    Close,
}

/// A connection event and the shard it concerns.
#[derive(Clone)]
pub struct ConnectionEventInfo {
    inner: Arc<ConnectionEventInner>,
}

impl ConnectionEventInfo {
    pub fn new(event: ConnectionEvent, shard: ShardDescriptor, error: Option<MemDbError>) -> Self {
        ConnectionEventInfo {
            inner: Arc::new(ConnectionEventInner {
                event,
                shard,
                error,
                timestamp: chrono::Utc::now().timestamp_millis(),
            }),
        }
    }

    pub fn event(&self) -> ConnectionEvent {
        self.inner.event
    }

    pub fn shard(&self) -> &ShardDescriptor {
        &self.inner.shard
    }

    /// The error behind an `Error` event.
    pub fn error(&self) -> Option<&MemDbError> {
        self.inner.error.as_ref()
    }

    /// Milliseconds since the epoch at which the event was raised.
    pub fn timestamp(&self) -> i64 {
        self.inner.timestamp
    }
}

impl Debug for ConnectionEventInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEventInfo")
            .field("event", &self.inner.event)
            .field("shard", &self.inner.shard)
            .field("error", &self.inner.error.as_ref().map(|e| e.message()))
            .field("timestamp", &self.inner.timestamp)
            .finish()
    }
}

struct ConnectionEventInner {
    event: ConnectionEvent,
    shard: ShardDescriptor,
    error: Option<MemDbError>,
    timestamp: i64,
}

pub trait ConnectionEventCallback: Send + Sync + Fn(ConnectionEventInfo) -> MemDbResult<()> {}

impl<F> ConnectionEventCallback for F where F: Send + Sync + Fn(ConnectionEventInfo) -> MemDbResult<()> {}

/// Receives the lifecycle events of a connection.
///
/// ```rust,ignore
/// connection.subscribe(ConnectionEventListener::new(|info| {
///     if info.event() == ConnectionEvent::Error {
///         log::warn!("lost {}", info.shard());
///     }
///     Ok(())
/// }))?;
/// ```
#[derive(Clone)]
pub struct ConnectionEventListener {
    on_event: Arc<dyn ConnectionEventCallback>,
}

impl ConnectionEventListener {
    pub fn new(on_event: impl ConnectionEventCallback + 'static) -> Self {
        ConnectionEventListener {
            on_event: Arc::new(on_event),
        }
    }
}

impl Handle<ConnectionEventInfo> for ConnectionEventListener {
    fn handle(&self, event: &Event<ConnectionEventInfo>) -> Result<(), BasuError> {
        match (self.on_event)(event.data.clone()) {
            Ok(_) => Ok(()),
            Err(e) => Err(BasuError::HandlerError(Error::from(e))),
        }
    }
}

impl Debug for ConnectionEventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEventListener").finish()
    }
}
