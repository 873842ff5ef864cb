//! Shard-local ACID transactions over a working set of locked documents.

mod context;
mod core;
mod keeper;
mod manager;
#[allow(clippy::module_inception)]
mod transaction;

pub use context::current_transaction;
pub use self::core::TransactionState;
pub(crate) use manager::{run_in_transaction, TransactionManager};
pub use transaction::Transaction;
pub(crate) use transaction::WeakTransaction;
