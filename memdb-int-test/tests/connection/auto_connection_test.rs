use memdb::config::ConnectionConfig;
use memdb::errors::{ErrorKind, MemDbError};
use memdb::{doc, val};
use memdb_int_test::test_util::{cleanup, create_test_context, run_test};

#[test]
fn test_autoconnect_to_multiple_shards() {
    run_test(
        create_test_context,
        |ctx| {
            let autoconn = ctx.auto_connect()?;
            let player = autoconn.collection("player");

            autoconn.transaction(|_| player.insert(doc! { _id: "p1", name: "rain" }), Some("s1"))?;
            let removed = autoconn.transaction(|_| player.remove("p1"), Some("s2"))?;
            assert_eq!(removed, 1);

            let found = autoconn.transaction(|_| player.find_by_id("p1"), Some("s1"))?;
            assert!(found.is_none());
            autoconn.close()
        },
        cleanup,
    )
}

#[test]
fn test_transaction_runs_only_on_requested_shard() {
    run_test(
        create_test_context,
        |ctx| {
            let cluster = ctx.cluster();
            let autoconn = ctx.auto_connect()?;
            let player = autoconn.collection("player");

            let shard_id = autoconn.transaction(
                |tx| {
                    player.insert(doc! { _id: "p1" })?;
                    assert_eq!(cluster.shard("s1").unwrap().active_transactions(), vec![tx.id()]);
                    assert!(cluster.shard("s2").unwrap().active_transactions().is_empty());
                    Ok::<_, MemDbError>(tx.shard_id().to_string())
                },
                Some("s1"),
            )?;
            assert_eq!(shard_id, "s1");
            autoconn.close()
        },
        cleanup,
    )
}

#[test]
fn test_unknown_shard_fails_before_running() {
    run_test(
        create_test_context,
        |ctx| {
            let autoconn = ctx.auto_connect()?;
            let mut ran = false;
            let err = autoconn
                .transaction(
                    |_| {
                        ran = true;
                        Ok::<_, MemDbError>(())
                    },
                    Some("cs3"),
                )
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::UnknownShard);
            assert!(!ran);
            autoconn.close()
        },
        cleanup,
    )
}

#[test]
fn test_reconnect_after_shard_restart() {
    run_test(
        create_test_context,
        |ctx| {
            let cluster = ctx.cluster();
            let autoconn = ctx.auto_connect()?;
            let player = autoconn.collection("player");
            autoconn.transaction(|_| player.insert(doc! { _id: "p1", level: 1 }), Some("s1"))?;

            cluster.stop_shard("s1")?;
            let err = autoconn
                .transaction(|_| player.find_by_id("p1"), Some("s1"))
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ConnectionLost);

            cluster.start_shard("s1")?;
            let found = autoconn
                .transaction(|_| player.find_by_id("p1"), Some("s1"))?
                .unwrap();
            assert_eq!(found.get("level"), Some(&val!(1)));
            autoconn.close()
        },
        cleanup,
    )
}

#[test]
fn test_single_shard_connection() {
    run_test(
        create_test_context,
        |ctx| {
            let autoconn = ctx
                .db()
                .connect(&ConnectionConfig::new("127.0.0.1", 32018).with_idle_timeout(0))?;
            let player = autoconn.collection("player");

            autoconn.transaction(|_| player.insert(doc! { _id: "p1" }), None)?;
            let shard_id = autoconn.transaction(
                |tx| Ok::<_, MemDbError>(tx.shard_id().to_string()),
                Some("s2"),
            )?;
            assert_eq!(shard_id, "s2");
            autoconn.close()
        },
        cleanup,
    )
}
