use crate::backend::BackendAdapter;
use crate::collection::Document;
use crate::errors::MemDbResult;
use crate::store::WorkingSet;

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Accepting operations
    Active,
    /// Validating and flushing the working set
    Committing,
    /// Every write applied
    Committed,
    /// Discarding the working set
    RollingBack,
    /// Nothing applied, locks released
    RolledBack,
}

impl TransactionState {
    pub fn is_finished(&self) -> bool {
        matches!(self, TransactionState::Committed | TransactionState::RolledBack)
    }
}

/// State and working set of a transaction, guarded together.
pub(crate) struct TransactionCore {
    pub(crate) state: TransactionState,
    pub(crate) working_set: WorkingSet,
}

impl TransactionCore {
    pub(crate) fn new() -> Self {
        TransactionCore {
            state: TransactionState::Active,
            working_set: WorkingSet::new(),
        }
    }
}

/// Reverses one backend write applied during commit.
#[derive(Debug, Clone)]
pub(crate) enum UndoStep {
    Remove { collection: String, id: String },
    Restore { collection: String, id: String, document: Document },
}

impl UndoStep {
    pub(crate) fn apply(&self, adapter: &BackendAdapter) -> MemDbResult<()> {
        match self {
            UndoStep::Remove { collection, id } => adapter.remove(collection, id).map(|_| ()),
            UndoStep::Restore { collection, id, document } => adapter.upsert(collection, id, document),
        }
    }
}
