use memdb::doc;
use memdb::errors::{ErrorKind, MemDbError};
use memdb_int_test::test_util::{cleanup, create_test_context, run_test};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_concurrent_unique_inserts() {
    run_test(
        create_test_context,
        |ctx| {
            let autoconn = ctx.auto_connect()?;
            let barrier = Arc::new(Barrier::new(2));

            let handles: Vec<_> = [("p1", "s1"), ("p2", "s2")]
                .into_iter()
                .map(|(id, shard_id)| {
                    let autoconn = autoconn.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        let player = autoconn.collection("player");
                        barrier.wait();
                        autoconn.transaction(
                            |_| player.insert(doc! { _id: id, deviceType: 1, deviceId: "d1" }),
                            Some(shard_id),
                        )
                    })
                })
                .collect();

            let results: Vec<Result<String, MemDbError>> = handles
                .into_iter()
                .map(|handle| handle.join().expect("insert thread panicked"))
                .collect();

            let inserted: Vec<&String> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
            let failed: Vec<&MemDbError> = results.iter().filter_map(|r| r.as_ref().err()).collect();
            assert_eq!(inserted.len(), 1);
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].kind(), &ErrorKind::DuplicateKey);

            let found = autoconn.transaction(
                |_| autoconn.collection("player").find(doc! { deviceType: 1, deviceId: "d1" }),
                Some("s1"),
            )?;
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].id(), Some(inserted[0].as_str()));
            autoconn.close()
        },
        cleanup,
    )
}

#[test]
fn test_unique_index_is_sparse() {
    run_test(
        create_test_context,
        |ctx| {
            let autoconn = ctx.auto_connect()?;
            let player = autoconn.collection("player");

            autoconn.transaction(
                |_| {
                    player.insert(doc! { _id: "p1", deviceType: 1 })?;
                    player.insert(doc! { _id: "p2", deviceType: 1 })?;
                    player.insert(doc! { _id: "p3" })?;
                    Ok::<_, MemDbError>(())
                },
                Some("s1"),
            )?;

            let err = autoconn
                .transaction(
                    |_| {
                        player.update("p1", doc! { "$set": { deviceId: "d1" } })?;
                        player.update("p2", doc! { "$set": { deviceId: "d1" } })
                    },
                    Some("s2"),
                )
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::DuplicateKey);

            let p1 = autoconn
                .transaction(|_| player.find_by_id("p1"), Some("s1"))?
                .unwrap();
            assert!(p1.get("deviceId").is_none());
            autoconn.close()
        },
        cleanup,
    )
}

#[test]
fn test_find_by_index_with_ignored_value() {
    run_test(
        create_test_context,
        |ctx| {
            let autoconn = ctx.auto_connect()?;
            let player = autoconn.collection("player");

            autoconn.transaction(
                |_| {
                    player.insert(doc! { _id: "p1", areaId: 1 })?;
                    player.insert(doc! { _id: "p2", areaId: 1 })?;
                    player.insert(doc! { _id: "p3", areaId: (-1) })?;
                    Ok::<_, MemDbError>(())
                },
                Some("s1"),
            )?;

            let in_area = autoconn.transaction(|_| player.find(doc! { areaId: 1 }), Some("s2"))?;
            assert_eq!(in_area.len(), 2);
            let ignored = autoconn.transaction(|_| player.find(doc! { areaId: (-1) }), Some("s2"))?;
            assert_eq!(ignored.len(), 1);
            assert_eq!(ignored[0].id(), Some("p3"));
            autoconn.close()
        },
        cleanup,
    )
}

#[test]
fn test_query_without_index_fails() {
    run_test(
        create_test_context,
        |ctx| {
            let autoconn = ctx.auto_connect()?;
            let player = autoconn.collection("player");
            let err = autoconn
                .transaction(|_| player.find(doc! { name: "rain" }), Some("s1"))
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::IndexNotFound);
            autoconn.close()
        },
        cleanup,
    )
}
