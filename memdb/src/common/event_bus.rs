use crate::common::MEMDB_EVENT;
use crate::errors::{ErrorKind, MemDbError, MemDbResult};
use basu::error::BasuError;
use basu::event::Event;
use basu::{EventBus, Handle, HandlerId};
use std::marker::PhantomData;
use std::sync::Arc;

/// Publishes lifecycle events to registered listeners.
///
/// A thin wrapper over a `basu` event bus with a single event type. Events
/// are delivered synchronously on the publishing thread, and publishing with
/// no listeners returns before an event is built.
///
/// ```ignore
/// let event_bus: MemDbEventBus<ConnectionEventInfo, ConnectionEventListener> = MemDbEventBus::new();
/// let subscriber = event_bus.register(listener)?;
/// event_bus.publish(info)?;
/// event_bus.deregister(subscriber)?;
/// ```
#[derive(Clone)]
pub struct MemDbEventBus<E, L> {
    inner: Arc<MemDbEventBusInner<E, L>>,
}

impl<E, L> Default for MemDbEventBus<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E, L> MemDbEventBus<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    pub fn new() -> Self {
        MemDbEventBus {
            inner: Arc::new(MemDbEventBusInner::new()),
        }
    }

    /// Registers an event listener with the bus.
    pub fn register(&self, listener: L) -> MemDbResult<SubscriberRef> {
        self.inner.register(listener)
    }

    /// Deregisters a previously registered event listener.
    pub fn deregister(&self, subscriber: SubscriberRef) -> MemDbResult<()> {
        self.inner.deregister(subscriber)
    }

    /// Publishes an event to all registered listeners.
    pub fn publish(&self, event: E) -> MemDbResult<()> {
        self.inner.publish(event)
    }

    /// Clears all registered listeners.
    pub fn close(&self) -> MemDbResult<()> {
        self.inner.close()
    }

    pub fn has_listeners(&self) -> bool {
        self.inner.has_listeners()
    }
}

/// Identifies a registered listener so it can be removed later.
pub struct SubscriberRef {
    pub(crate) inner: HandlerId,
}

impl SubscriberRef {
    pub fn new(inner: HandlerId) -> Self {
        SubscriberRef { inner }
    }
}

struct MemDbEventBusInner<E, L> {
    event_bus: EventBus<E>,
    phantom_data: PhantomData<L>,
}

impl<E, L> MemDbEventBusInner<E, L>
where
    L: Handle<E> + 'static,
    E: Send + Sync,
{
    fn new() -> Self {
        MemDbEventBusInner {
            event_bus: EventBus::new(),
            phantom_data: PhantomData,
        }
    }

    fn register(&self, listener: L) -> MemDbResult<SubscriberRef> {
        self.event_bus
            .subscribe(MEMDB_EVENT, Box::new(listener))
            .map(SubscriberRef::new)
            .map_err(Self::memdb_error)
    }

    fn deregister(&self, subscriber: SubscriberRef) -> MemDbResult<()> {
        self.event_bus
            .unsubscribe(MEMDB_EVENT, &subscriber.inner)
            .map(|_| ())
            .map_err(Self::memdb_error)
    }

    fn publish(&self, event: E) -> MemDbResult<()> {
        let handler_count = match self.event_bus.get_handler_count(MEMDB_EVENT) {
            Ok(count) => count,
            Err(BasuError::EventTypeNotFOUND) => return Ok(()),
            Err(e) => return Err(Self::memdb_error(e)),
        };

        if handler_count == 0 {
            return Ok(());
        }

        let basu_event = Event::new(event);
        self.event_bus
            .publish(MEMDB_EVENT, &basu_event)
            .map(|_| ())
            .map_err(Self::memdb_error)
    }

    fn close(&self) -> MemDbResult<()> {
        self.event_bus.clear().map(|_| ()).map_err(Self::memdb_error)
    }

    fn has_listeners(&self) -> bool {
        match self.event_bus.get_handler_count(MEMDB_EVENT) {
            Ok(count) => count > 0,
            Err(BasuError::EventTypeNotFOUND) => false,
            Err(e) => {
                log::warn!("Failed to check listeners: {}, defaulting to false", e);
                false
            }
        }
    }

    fn memdb_error(e: BasuError) -> MemDbError {
        let error = match e {
            BasuError::EventTypeNotFOUND => MemDbError::new(
                "Event bus error: no handler is registered for the event type",
                ErrorKind::EventError,
            ),
            BasuError::MutexPoisoned => MemDbError::new(
                "Event bus error: internal mutex poisoned",
                ErrorKind::EventError,
            ),
            BasuError::HandlerError(e) => {
                let message = e
                    .source()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| e.to_string());
                MemDbError::new(&format!("Event handler error: {}", message), ErrorKind::EventError)
            }
        };
        log::error!("{}", error);
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct CountingListener {
        count: Arc<AtomicUsize>,
    }

    impl Handle<u32> for CountingListener {
        fn handle(&self, event: &Event<u32>) -> Result<(), BasuError> {
            self.count.fetch_add(event.data as usize, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_publish_without_listeners_is_noop() {
        let event_bus: MemDbEventBus<u32, CountingListener> = MemDbEventBus::new();
        assert!(!event_bus.has_listeners());
        assert!(event_bus.publish(1).is_ok());
    }

    #[test]
    fn test_register_publish_deregister() {
        let count = Arc::new(AtomicUsize::new(0));
        let event_bus: MemDbEventBus<u32, CountingListener> = MemDbEventBus::new();
        let subscriber = event_bus
            .register(CountingListener { count: count.clone() })
            .unwrap();
        assert!(event_bus.has_listeners());

        event_bus.publish(3).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);

        event_bus.deregister(subscriber).unwrap();
        event_bus.publish(3).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_close_clears_listeners() {
        let count = Arc::new(AtomicUsize::new(0));
        let event_bus: MemDbEventBus<u32, CountingListener> = MemDbEventBus::new();
        event_bus.register(CountingListener { count }).unwrap();
        event_bus.close().unwrap();
        assert!(!event_bus.has_listeners());
    }

    #[test]
    fn test_deregister_unknown_subscriber_fails() {
        let event_bus: MemDbEventBus<u32, CountingListener> = MemDbEventBus::new();
        let result = event_bus.deregister(SubscriberRef::new(HandlerId::new()));
        assert!(result.is_err());
    }

    #[test]
    fn test_handler_error_maps_to_event_error() {
        let error = BasuError::HandlerError(anyhow::anyhow!("listener failed"));
        let result = MemDbEventBusInner::<u32, CountingListener>::memdb_error(error);
        assert_eq!(result.kind(), &ErrorKind::EventError);
        assert!(result.to_string().starts_with("Event handler error"));
    }
}
