use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{ErrorKind, MemDbError, MemDbResult};
use crate::shard::Shard;
use crate::transaction::context;
use crate::transaction::keeper::LockKeeper;
use crate::transaction::{Transaction, WeakTransaction};

/// Begins transactions on a shard and tracks the active ones.
pub(crate) struct TransactionManager {
    next_id: AtomicU64,
    open: AtomicBool,
    active: Arc<DashMap<u64, WeakTransaction>>,
    keeper: LockKeeper,
}

impl TransactionManager {
    pub(crate) fn new() -> Self {
        TransactionManager {
            next_id: AtomicU64::new(0),
            open: AtomicBool::new(true),
            active: Arc::new(DashMap::new()),
            keeper: LockKeeper::new(),
        }
    }

    /// Starts renewing the locks of active transactions every `interval`.
    pub(crate) fn start_keeper(&self, interval: Duration) {
        self.keeper.start(self.active.clone(), interval);
    }

    pub(crate) fn begin(&self, shard: &Shard) -> MemDbResult<Transaction> {
        if !self.open.load(Ordering::SeqCst) {
            log::error!("Cannot begin a transaction on stopped shard {}", shard.id());
            return Err(MemDbError::new(
                &format!("Connection to shard {} lost", shard.id()),
                ErrorKind::ConnectionLost,
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let transaction = Transaction::new(id, shard.clone());
        self.active.insert(id, transaction.downgrade());
        log::debug!("Transaction {} started on shard {}", id, shard.id());
        Ok(transaction)
    }

    pub(crate) fn finish(&self, id: u64) {
        self.active.remove(&id);
    }

    pub(crate) fn active_transactions(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.active.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Stops accepting transactions and aborts the running ones with
    /// `reason`.
    pub(crate) fn close(&self, reason: MemDbError) {
        if self
            .open
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        self.keeper.stop();
        let transactions: Vec<Transaction> = self.active.iter().filter_map(|e| e.value().upgrade()).collect();
        for transaction in transactions {
            transaction.abort(reason.clone());
        }
    }
}

/// Rolls the transaction back if it is dropped while still active, which
/// happens when the transaction body panics.
struct TransactionGuard {
    transaction: Transaction,
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        self.transaction.rollback_quietly();
    }
}

/// Runs `f` in a new transaction on `shard`.
///
/// The transaction is bound as the ambient transaction of the calling
/// thread while `f` runs. It commits when `f` returns `Ok` and rolls back
/// when `f` returns `Err`, in which case the error is returned unchanged.
pub(crate) fn run_in_transaction<T, E, F>(shard: &Shard, f: F) -> Result<T, E>
where
    F: FnOnce(&Transaction) -> Result<T, E>,
    E: From<MemDbError>,
{
    let transaction = shard.manager().begin(shard)?;
    let guard = TransactionGuard {
        transaction: transaction.clone(),
    };

    let result = {
        let _ambient = context::bind(&transaction);
        f(&transaction)
    };

    match result {
        Ok(value) => {
            transaction.commit()?;
            drop(guard);
            Ok(value)
        }
        Err(e) => {
            drop(guard);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{CollectionDefinition, IndexDefinition};
    use crate::config::ClusterConfig;
    use crate::shard::LocalCluster;
    use crate::transaction::{current_transaction, TransactionState};
    use crate::doc;
    use std::collections::BTreeMap;

    fn shard() -> Shard {
        let mut collections = BTreeMap::new();
        collections.insert(
            "player".to_string(),
            CollectionDefinition::new(vec![IndexDefinition::new(&["name"]).unique()]),
        );
        let config = ClusterConfig::single_shard("s1").with_collections(collections);
        let cluster = LocalCluster::new(config).unwrap();
        cluster.start_shard("s1").unwrap()
    }

    #[test]
    fn test_commit_on_ok() {
        let shard = shard();
        let id: MemDbResult<String> = run_in_transaction(&shard, |tx| {
            tx.collection("player").insert(doc! { _id: "p1", name: "rain" })
        });
        assert_eq!(id.unwrap(), "p1");

        let found: MemDbResult<_> = run_in_transaction(&shard, |tx| tx.collection("player").find_by_id("p1"));
        assert_eq!(found.unwrap(), Some(doc! { _id: "p1", name: "rain" }));
        assert!(shard.manager().active_transactions().is_empty());
    }

    #[test]
    fn test_rollback_on_err_returns_error_unchanged() {
        #[derive(Debug, PartialEq)]
        enum AppError {
            Db(ErrorKind),
            Rejected,
        }

        impl From<MemDbError> for AppError {
            fn from(e: MemDbError) -> Self {
                AppError::Db(e.kind().clone())
            }
        }

        let shard = shard();
        let result: Result<(), AppError> = run_in_transaction(&shard, |tx| {
            tx.collection("player").insert(doc! { _id: "p1" })?;
            Err(AppError::Rejected)
        });
        assert_eq!(result.unwrap_err(), AppError::Rejected);

        let found: MemDbResult<_> = run_in_transaction(&shard, |tx| tx.collection("player").find_by_id("p1"));
        assert_eq!(found.unwrap(), None);
    }

    #[test]
    fn test_ambient_binding() {
        let shard = shard();
        assert!(current_transaction().is_none());
        let result: MemDbResult<u64> = run_in_transaction(&shard, |tx| {
            let ambient = current_transaction().map(|t| t.id());
            assert_eq!(ambient, Some(tx.id()));
            Ok(tx.id())
        });
        assert!(result.is_ok());
        assert!(current_transaction().is_none());
    }

    #[test]
    fn test_panic_rolls_back() {
        let shard = shard();
        let captured = shard.clone();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _: MemDbResult<()> = run_in_transaction(&captured, |tx| {
                tx.collection("player").insert(doc! { _id: "p1" })?;
                panic!("boom");
            });
        }));
        assert!(outcome.is_err());
        assert!(shard.manager().active_transactions().is_empty());

        // the lock was released by the rollback
        let found: MemDbResult<_> = run_in_transaction(&shard, |tx| tx.collection("player").find_by_id("p1"));
        assert_eq!(found.unwrap(), None);
    }

    #[test]
    fn test_closed_manager_rejects_begin_and_aborts_active() {
        let shard = shard();
        let transaction = shard.manager().begin(&shard).unwrap();
        shard
            .manager()
            .close(MemDbError::new("gone", ErrorKind::ConnectionLost));

        let err = shard.manager().begin(&shard).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ConnectionLost);

        let err = transaction.commit().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ConnectionLost);
        assert_eq!(transaction.state(), TransactionState::RolledBack);
    }

    #[test]
    fn test_dropped_transaction_releases_locks() {
        let shard = shard();
        let transaction = shard.manager().begin(&shard).unwrap();
        assert_eq!(transaction.collection("player").find_by_id("p1").unwrap(), None);
        assert_eq!(shard.manager().active_transactions(), vec![transaction.id()]);

        drop(transaction);
        assert!(shard.manager().active_transactions().is_empty());

        let id: MemDbResult<String> = run_in_transaction(&shard, |tx| {
            tx.collection("player").insert(doc! { _id: "p1", name: "rain" })
        });
        assert_eq!(id.unwrap(), "p1");
    }

    #[test]
    fn test_transaction_ids_increase() {
        let shard = shard();
        let first = shard.manager().begin(&shard).unwrap();
        let second = shard.manager().begin(&shard).unwrap();
        assert!(second.id() > first.id());
        assert_eq!(shard.manager().active_transactions(), vec![first.id(), second.id()]);
        first.rollback().unwrap();
        second.rollback().unwrap();
        assert!(shard.manager().active_transactions().is_empty());
    }
}
