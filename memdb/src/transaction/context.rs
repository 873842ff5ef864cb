use std::cell::RefCell;
use std::marker::PhantomData;

use crate::transaction::Transaction;

thread_local! {
    static AMBIENT: RefCell<Vec<Transaction>> = const { RefCell::new(Vec::new()) };
}

/// Keeps a transaction bound to the current thread until dropped.
pub(crate) struct AmbientGuard {
    // bound to the thread that created it
    _not_send: PhantomData<*const ()>,
}

impl Drop for AmbientGuard {
    fn drop(&mut self) {
        AMBIENT.with(|ambient| {
            ambient.borrow_mut().pop();
        });
    }
}

/// Binds `transaction` as the ambient transaction of this thread. Bindings
/// nest; the innermost one wins.
pub(crate) fn bind(transaction: &Transaction) -> AmbientGuard {
    AMBIENT.with(|ambient| ambient.borrow_mut().push(transaction.clone()));
    AmbientGuard {
        _not_send: PhantomData,
    }
}

/// The transaction running on this thread, if any.
pub fn current_transaction() -> Option<Transaction> {
    AMBIENT.with(|ambient| ambient.borrow().last().cloned())
}
