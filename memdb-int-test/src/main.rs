use memdb::errors::MemDbResult;
use memdb::doc;
use memdb_int_test::test_util::{cleanup, create_test_context};
use rand::Rng;
use std::thread;

fn main() -> MemDbResult<()> {
    println!("Starting stress test...");
    let ctx = create_test_context()?;
    let autoconn = ctx.auto_connect()?;

    let players = 200;
    let workers = 8;
    let rounds = 500;

    let start = std::time::Instant::now();
    let ids: Vec<String> = (0..players)
        .map(|_| uuid::Uuid::new_v4().to_string())
        .collect();
    for id in &ids {
        let player = autoconn.collection("player");
        autoconn.transaction(|_| player.insert(doc! { _id: (id.as_str()), gold: 0 }), Some("s1"))?;
    }
    println!("Inserted {} players in {:?}", players, start.elapsed());

    let start = std::time::Instant::now();
    let handles: Vec<_> = (0..workers)
        .map(|w| {
            let autoconn = autoconn.clone();
            let ids = ids.clone();
            thread::spawn(move || -> MemDbResult<()> {
                let shard_id = if w % 2 == 0 { "s1" } else { "s2" };
                let player = autoconn.collection("player");
                let mut rng = rand::rng();
                for _ in 0..rounds {
                    let from = &ids[rng.random_range(0..ids.len())];
                    let to = &ids[rng.random_range(0..ids.len())];
                    let mut ordered = [from, to];
                    ordered.sort();
                    autoconn.transaction(
                        |_| {
                            // locks are taken in id order
                            for id in ordered {
                                player.find_by_id(id)?;
                            }
                            player.update(from.as_str(), doc! { "$inc": { gold: (-1) } })?;
                            player.update(to.as_str(), doc! { "$inc": { gold: 1 } })
                        },
                        Some(shard_id),
                    )?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        if let Ok(Err(e)) = handle.join() {
            eprintln!("Worker failed: {}", e);
        }
    }
    println!(
        "Ran {} transfers on {} threads in {:?}",
        workers * rounds,
        workers,
        start.elapsed()
    );

    let start = std::time::Instant::now();
    let mut total = 0i64;
    for id in &ids {
        let player = autoconn.collection("player");
        let found = autoconn.transaction(|_| player.find_read_only(id.as_str()), Some("s2"))?;
        if let Some(gold) = found.first().and_then(|p| p.get("gold")).and_then(|g| g.as_i64()) {
            total += *gold;
        }
    }
    println!("Checked balances in {:?}", start.elapsed());
    if total != 0 {
        eprintln!("Balance mismatch: total gold is {}", total);
    }
    assert_eq!(total, 0);

    autoconn.close()?;
    cleanup(ctx)
}
