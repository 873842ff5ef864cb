use memdb::collection::{CollectionDefinition, IndexDefinition};
use memdb::config::ClusterConfig;
use memdb::connection::AutoConnection;
use memdb::errors::MemDbResult;
use memdb::memdb::MemDb;
use memdb::shard::LocalCluster;
use memdb::val;
use std::thread;
use std::time::{Duration, Instant};

/// Runs `test` between `before` and `after`, retrying up to three times.
///
/// Every attempt gets a fresh cluster from `before`; `after` runs even when
/// the test body fails. A panic in any step counts as a failed attempt.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> MemDbResult<()> + std::panic::RefUnwindSafe,
    B: Fn() -> MemDbResult<TestContext> + std::panic::RefUnwindSafe,
    A: Fn(TestContext) -> MemDbResult<()> + std::panic::RefUnwindSafe,
{
    const MAX_ATTEMPTS: u32 = 3;
    let mut failure = String::new();

    for attempt in 1..=MAX_ATTEMPTS {
        let started = Instant::now();
        let outcome = std::panic::catch_unwind(|| -> Result<(), String> {
            let ctx = before().map_err(|e| format!("before: {:?}", e))?;
            let tested = test(ctx.clone()).map_err(|e| format!("test: {:?}", e));
            let cleaned = after(ctx).map_err(|e| format!("after: {:?}", e));
            tested.and(cleaned)
        });

        failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e,
            Err(panic) => match panic.downcast_ref::<&str>() {
                Some(message) => format!("panic: {}", message),
                None => match panic.downcast_ref::<String>() {
                    Some(message) => format!("panic: {}", message),
                    None => "panic".to_string(),
                },
            },
        };

        if attempt < MAX_ATTEMPTS {
            log::warn!(
                "Attempt {}/{} failed after {:?}: {}",
                attempt,
                MAX_ATTEMPTS,
                started.elapsed(),
                failure
            );
            thread::sleep(Duration::from_millis(100 * attempt as u64));
        }
    }

    panic!("Test failed after {} attempts: {}", MAX_ATTEMPTS, failure);
}

#[derive(Clone)]
pub struct TestContext {
    db: MemDb,
}

impl TestContext {
    pub fn new(db: MemDb) -> Self {
        Self { db }
    }

    pub fn db(&self) -> MemDb {
        self.db.clone()
    }

    pub fn cluster(&self) -> LocalCluster {
        self.db.cluster().clone()
    }

    pub fn auto_connect(&self) -> MemDbResult<AutoConnection> {
        self.db.auto_connect()
    }
}

/// Two shards sharing one backend, with the `player` schema used across
/// the integration tests.
pub fn test_config() -> ClusterConfig {
    let player = CollectionDefinition::new(vec![
        IndexDefinition::new(&["areaId"]).ignore_values("areaId", vec![val!(""), val!(-1)]),
        IndexDefinition::new(&["deviceType", "deviceId"]).unique(),
    ]);

    let mut config = ClusterConfig::new()
        .with_shard("s1", "127.0.0.1", 32017)
        .with_shard("s2", "127.0.0.1", 32018)
        .with_collection("player", player);
    config.lock_ttl_ms = 3_000;
    config.idle_timeout_ms = 0;
    config
}

pub fn create_test_context() -> MemDbResult<TestContext> {
    let db = MemDb::builder().config(test_config()).open()?;
    Ok(TestContext::new(db))
}

pub fn cleanup(ctx: TestContext) -> MemDbResult<()> {
    ctx.cluster().flush_db()?;
    ctx.db().shutdown();
    Ok(())
}
