use memdb::errors::MemDbError;
use memdb::{doc, val};
use memdb_int_test::test_util::{cleanup, create_test_context, run_test};
use std::thread;
use std::time::Duration;

#[test]
fn test_concurrent_read_modify_write() {
    run_test(
        create_test_context,
        |ctx| {
            let autoconn = ctx.auto_connect()?;
            let user = autoconn.collection("user");
            autoconn.transaction(
                |_| user.insert(doc! { _id: "1", name: "rain", level: 0 }),
                Some("s1"),
            )?;

            let count = 8;
            let handles: Vec<_> = (0..count)
                .map(|i| {
                    let autoconn = autoconn.clone();
                    let shard_id = if i % 2 == 0 { "s1" } else { "s2" };
                    thread::spawn(move || {
                        thread::sleep(Duration::from_millis(10 * i as u64));
                        let user = autoconn.collection("user");
                        autoconn.transaction(
                            |_| {
                                let level = user
                                    .find_by_id("1")?
                                    .and_then(|u| u.get("level").and_then(|l| l.as_i64().copied()))
                                    .unwrap_or_default();
                                // non-atomic check and update
                                thread::sleep(Duration::from_millis(20));
                                user.update("1", doc! { "$set": { level: (level + 1) } })
                            },
                            Some(shard_id),
                        )
                    })
                })
                .collect();

            for handle in handles {
                let updated = handle.join().expect("worker panicked")?;
                assert_eq!(updated, 1);
            }

            let found = autoconn
                .transaction(|_| user.find_by_id("1"), Some("s2"))?
                .unwrap();
            assert_eq!(found.get("level"), Some(&val!(count)));

            autoconn.transaction(|_| user.remove("1"), Some("s1"))?;
            autoconn.close()
        },
        cleanup,
    )
}

#[test]
fn test_parallel_transactions_on_one_connection() {
    run_test(
        create_test_context,
        |ctx| {
            let autoconn = ctx.auto_connect()?;
            let connection = autoconn.connection("s1")?;

            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let connection = connection.clone();
                    thread::spawn(move || {
                        connection.transaction(|tx| {
                            tx.collection("item")
                                .insert(doc! { _id: (format!("i{}", i)), owner: "p1" })?;
                            thread::sleep(Duration::from_millis(20));
                            Ok::<_, MemDbError>(())
                        })
                    })
                })
                .collect();
            for handle in handles {
                handle.join().expect("worker panicked")?;
            }

            let items = connection.transaction(|tx| {
                let item = tx.collection("item");
                let mut found = Vec::new();
                for i in 0..4 {
                    found.extend(item.find_by_id(&format!("i{}", i))?);
                }
                Ok::<_, MemDbError>(found)
            })?;
            assert_eq!(items.len(), 4);
            assert!(connection.in_flight().is_empty());
            autoconn.close()
        },
        cleanup,
    )
}
