use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::common::{schedule_task, ScheduledTask};
use crate::transaction::{Transaction, WeakTransaction};

/// Renews the locks of active transactions before their TTL runs out.
///
/// A transaction whose renewal fails is aborted; it rolls back at its next
/// operation or at commit.
#[derive(Default)]
pub(crate) struct LockKeeper {
    task: Mutex<Option<ScheduledTask>>,
}

impl LockKeeper {
    pub(crate) fn new() -> Self {
        LockKeeper::default()
    }

    pub(crate) fn start(&self, active: Arc<DashMap<u64, WeakTransaction>>, interval: Duration) {
        let task = schedule_task(interval, move || {
            let transactions: Vec<Transaction> = active.iter().filter_map(|e| e.value().upgrade()).collect();
            for transaction in transactions {
                if let Err(e) = transaction.renew_leases() {
                    log::warn!("Failed to renew locks of transaction {}: {}", transaction.id(), e);
                }
            }
        });
        *self.task.lock() = task;
    }

    pub(crate) fn stop(&self) {
        self.task.lock().take();
    }
}
