use memdb::doc;
use memdb::errors::{ErrorKind, MemDbError};
use memdb_int_test::test_util::{cleanup, create_test_context, run_test};
use std::fmt::{Display, Formatter};

#[derive(Debug)]
enum GameError {
    Oops,
    Db(MemDbError),
}

impl Display for GameError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GameError::Oops => write!(f, "Oops!"),
            GameError::Db(e) => write!(f, "{}", e),
        }
    }
}

impl From<MemDbError> for GameError {
    fn from(e: MemDbError) -> Self {
        GameError::Db(e)
    }
}

#[test]
fn test_error_rolls_back_insert() {
    run_test(
        create_test_context,
        |ctx| {
            let autoconn = ctx.auto_connect()?;
            let user = autoconn.collection("user");

            let result: Result<(), GameError> = autoconn.transaction(
                |_| {
                    user.insert(doc! { _id: "1", name: "rain", level: 0 })?;
                    Err(GameError::Oops)
                },
                Some("s1"),
            );
            let err = result.unwrap_err();
            assert!(matches!(err, GameError::Oops));
            assert_eq!(err.to_string(), "Oops!");

            let found = autoconn.transaction(|_| user.find_by_id("1"), Some("s1"))?;
            assert!(found.is_none());
            autoconn.close()
        },
        cleanup,
    )
}

#[test]
fn test_error_restores_updated_and_removed_documents() {
    run_test(
        create_test_context,
        |ctx| {
            let autoconn = ctx.auto_connect()?;
            let user = autoconn.collection("user");
            autoconn.transaction(
                |_| {
                    user.insert(doc! { _id: "1", level: 1 })?;
                    user.insert(doc! { _id: "2", level: 2 })
                },
                Some("s1"),
            )?;

            let result: Result<(), GameError> = autoconn.transaction(
                |_| {
                    user.update("1", doc! { "$inc": { level: 10 } })?;
                    user.remove("2")?;
                    Err(GameError::Oops)
                },
                Some("s2"),
            );
            assert!(result.is_err());

            let (first, second) = autoconn.transaction(
                |_| Ok::<_, MemDbError>((user.find_by_id("1")?, user.find_by_id("2")?)),
                Some("s1"),
            )?;
            assert_eq!(first.unwrap(), doc! { _id: "1", level: 1 });
            assert_eq!(second.unwrap(), doc! { _id: "2", level: 2 });
            autoconn.close()
        },
        cleanup,
    )
}

#[test]
fn test_panic_rolls_back() {
    run_test(
        create_test_context,
        |ctx| {
            let autoconn = ctx.auto_connect()?;
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let user = autoconn.collection("user");
                autoconn.transaction(
                    |_| -> Result<(), MemDbError> {
                        user.insert(doc! { _id: "1" })?;
                        panic!("boom")
                    },
                    Some("s1"),
                )
            }));
            assert!(outcome.is_err());

            let user = autoconn.collection("user");
            let found = autoconn.transaction(|_| user.find_by_id("1"), Some("s2"))?;
            assert!(found.is_none());
            autoconn.close()
        },
        cleanup,
    )
}

#[test]
fn test_stopped_shard_fails_transaction() {
    run_test(
        create_test_context,
        |ctx| {
            let cluster = ctx.cluster();
            let autoconn = ctx.auto_connect()?;
            let user = autoconn.collection("user");

            let err = autoconn
                .transaction(
                    |_| {
                        user.insert(doc! { _id: "1" })?;
                        cluster.stop_shard("s1")?;
                        user.insert(doc! { _id: "2" })
                    },
                    Some("s1"),
                )
                .unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ConnectionLost);

            let found = autoconn.transaction(|_| user.find_read_only("1"), Some("s2"))?;
            assert!(found.is_empty());
            autoconn.close()
        },
        cleanup,
    )
}
