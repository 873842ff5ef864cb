use memdb::errors::MemDbError;
use memdb::{doc, val};
use memdb_int_test::test_util::{cleanup, create_test_context, run_test};
use std::sync::mpsc;
use std::thread;

#[test]
fn test_uncommitted_changes_are_invisible() {
    run_test(
        create_test_context,
        |ctx| {
            let autoconn = ctx.auto_connect()?;
            let player = autoconn.collection("player");
            autoconn.transaction(|_| player.insert(doc! { _id: "p1", level: 0 }), Some("s1"))?;

            let (staged_tx, staged_rx) = mpsc::channel();
            let (resume_tx, resume_rx) = mpsc::channel::<()>();
            let writer = {
                let autoconn = autoconn.clone();
                thread::spawn(move || {
                    let player = autoconn.collection("player");
                    autoconn.transaction(
                        |_| {
                            player.update("p1", doc! { "$set": { level: 5 } })?;
                            let own = player.find_by_id("p1")?;
                            let _ = staged_tx.send(own);
                            let _ = resume_rx.recv();
                            Ok::<_, MemDbError>(())
                        },
                        Some("s1"),
                    )
                })
            };

            let own_view = staged_rx.recv().expect("writer stopped").unwrap();
            assert_eq!(own_view.get("level"), Some(&val!(5)));

            let outside = autoconn.transaction(|_| player.find_one_read_only("p1"), Some("s2"))?;
            assert_eq!(outside.unwrap().get("level"), Some(&val!(0)));

            let _ = resume_tx.send(());
            writer.join().expect("writer panicked")?;

            let committed = autoconn.transaction(|_| player.find_one_read_only("p1"), Some("s2"))?;
            assert_eq!(committed.unwrap().get("level"), Some(&val!(5)));
            autoconn.close()
        },
        cleanup,
    )
}

#[test]
fn test_read_only_find_across_shards() {
    run_test(
        create_test_context,
        |ctx| {
            let autoconn = ctx.auto_connect()?;
            let player = autoconn.collection("player");

            autoconn.transaction(
                |_| {
                    player.insert(doc! { _id: "p1", name: "rain", areaId: 1 })?;
                    player.insert(doc! { _id: "p2", name: "snow", areaId: 1 })?;
                    Ok::<_, MemDbError>(())
                },
                Some("s1"),
            )?;
            autoconn.transaction(|_| player.update("p1", doc! { "$set": { name: "storm" } }), Some("s1"))?;

            let by_id = autoconn.transaction(|_| player.find_read_only("p1"), Some("s2"))?;
            assert_eq!(by_id.len(), 1);
            assert_eq!(by_id[0].get("name"), Some(&val!("storm")));

            let by_area = autoconn.transaction(|_| player.find_read_only(doc! { areaId: 1 }), Some("s2"))?;
            assert_eq!(by_area.len(), 2);
            autoconn.close()
        },
        cleanup,
    )
}

#[test]
fn test_explicit_begin_and_rollback() {
    run_test(
        create_test_context,
        |ctx| {
            let shard = ctx.cluster().shard("s1").expect("s1 is running");
            let tx = shard.begin()?;
            tx.collection("player").insert(doc! { _id: "p1" })?;
            assert_eq!(tx.touched(), 1);
            tx.rollback()?;

            let found = shard.transaction(|tx| tx.collection("player").find_by_id("p1"))?;
            assert!(found.is_none());

            let tx = shard.begin()?;
            tx.collection("player").insert(doc! { _id: "p1" })?;
            tx.commit()?;
            let found = shard.transaction(|tx| tx.collection("player").find_by_id("p1"))?;
            assert!(found.is_some());
            Ok(())
        },
        cleanup,
    )
}
