use memdb::connection::{ConnectionEvent, ConnectionEventInfo, ConnectionEventListener};
use memdb::errors::ErrorKind;
use memdb::memdb::MemDb;
use memdb_int_test::test_util::{cleanup, create_test_context, run_test, test_config, TestContext};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use test_retry::retry;

fn wait_for_event<F: Fn() -> bool>(timeout_ms: u64, check: F) {
    awaitility::at_most(Duration::from_millis(timeout_ms)).until(check);
}

fn recorder() -> (Arc<Mutex<Vec<ConnectionEventInfo>>>, ConnectionEventListener) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let listener = ConnectionEventListener::new(move |info| {
        sink.lock().push(info);
        Ok(())
    });
    (events, listener)
}

fn kinds(events: &Mutex<Vec<ConnectionEventInfo>>) -> Vec<ConnectionEvent> {
    events.lock().iter().map(|e| e.event()).collect()
}

#[test]
#[retry]
fn test_shard_stop_raises_error_then_close() {
    run_test(
        create_test_context,
        |ctx| {
            let connection = ctx.db().open_connection("s1")?;
            let (events, listener) = recorder();
            connection.subscribe(listener)?;

            ctx.cluster().stop_shard("s1")?;
            wait_for_event(2000, || events.lock().len() >= 2);

            assert_eq!(kinds(&events), vec![ConnectionEvent::Error, ConnectionEvent::Close]);
            let events = events.lock();
            assert_eq!(events[0].shard().id(), "s1");
            assert_eq!(
                events[0].error().map(|e| e.kind().clone()),
                Some(ErrorKind::ConnectionLost)
            );
            assert!(!connection.is_connected());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_close_raises_close_only() {
    run_test(
        create_test_context,
        |ctx| {
            let connection = ctx.db().open_connection("s2")?;
            let (events, listener) = recorder();
            let subscriber = connection.subscribe(listener)?;

            connection.close()?;
            assert_eq!(kinds(&events), vec![ConnectionEvent::Close]);

            connection.unsubscribe(subscriber)?;
            connection.reconnect()?;
            assert_eq!(kinds(&events), vec![ConnectionEvent::Close]);
            connection.close()
        },
        cleanup,
    )
}

#[test]
#[retry]
fn test_idle_connection_closes_itself() {
    run_test(
        || {
            let mut config = test_config();
            config.idle_timeout_ms = 100;
            Ok(TestContext::new(MemDb::builder().config(config).open()?))
        },
        |ctx| {
            let autoconn = ctx.auto_connect()?;
            let (events, listener) = recorder();
            autoconn.subscribe(listener)?;

            let player = autoconn.collection("player");
            autoconn.transaction(|_| player.find_by_id("p1"), Some("s1"))?;
            let connection = autoconn.connection("s1")?;

            wait_for_event(2000, || !connection.is_connected());
            assert!(kinds(&events).contains(&ConnectionEvent::Close));
            assert!(!kinds(&events).contains(&ConnectionEvent::Error));

            // the router reopens idle connections on demand
            let found = autoconn.transaction(|_| player.find_by_id("p1"), Some("s1"))?;
            assert!(found.is_none());
            assert!(kinds(&events).contains(&ConnectionEvent::Connect));
            autoconn.close()
        },
        cleanup,
    )
}

#[test]
fn test_listener_error_does_not_break_connection() {
    run_test(
        create_test_context,
        |ctx| {
            let connection = ctx.db().open_connection("s1")?;
            connection.subscribe(ConnectionEventListener::new(|_| {
                Err(memdb::errors::MemDbError::new("listener failed", ErrorKind::InternalError))
            }))?;
            connection.close()?;
            connection.reconnect()?;
            assert!(connection.is_connected());
            connection.close()
        },
        cleanup,
    )
}
