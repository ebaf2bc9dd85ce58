//! A single client's unit of work under strict two-phase locking (spec
//! §3: "Transaction"). Grounded on the teacher's `Transaction`
//! (`src/transaction/tx.rs`), generalized from its global-`Database`
//! singleton style into a plain owned struct with an explicit id,
//! matching this crate's non-global [`crate::engine::Engine`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::storage::row::RowId;

pub type TransactionId = u64;

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// `{txn_id, state, isolation_level, shared_lock_set, exclusive_lock_set,
/// prev_lsn}` (spec §3).
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    isolation_level: IsolationLevel,
    shared_lock_set: HashSet<RowId>,
    exclusive_lock_set: HashSet<RowId>,
    prev_lsn: Option<u64>,
}

impl Transaction {
    pub fn new(isolation_level: IsolationLevel) -> Self {
        Self {
            id: NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed),
            state: TransactionState::Growing,
            isolation_level,
            shared_lock_set: HashSet::new(),
            exclusive_lock_set: HashSet::new(),
            prev_lsn: None,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn is_aborted(&self) -> bool {
        self.state == TransactionState::Aborted
    }

    pub fn shared_lock_set(&self) -> &HashSet<RowId> {
        &self.shared_lock_set
    }

    pub fn exclusive_lock_set(&self) -> &HashSet<RowId> {
        &self.exclusive_lock_set
    }

    pub fn record_shared(&mut self, rid: RowId) {
        self.shared_lock_set.insert(rid);
    }

    pub fn record_exclusive(&mut self, rid: RowId) {
        self.exclusive_lock_set.insert(rid);
    }

    /// Moves `rid` from the shared set to the exclusive set, as happens
    /// on a successful lock upgrade.
    pub fn promote_to_exclusive(&mut self, rid: RowId) {
        self.shared_lock_set.remove(&rid);
        self.exclusive_lock_set.insert(rid);
    }

    pub fn forget_shared(&mut self, rid: RowId) {
        self.shared_lock_set.remove(&rid);
    }

    pub fn forget_exclusive(&mut self, rid: RowId) {
        self.exclusive_lock_set.remove(&rid);
    }

    pub fn prev_lsn(&self) -> Option<u64> {
        self.prev_lsn
    }

    pub fn set_prev_lsn(&mut self, lsn: u64) {
        self.prev_lsn = Some(lsn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_transaction_starts_growing_with_empty_lock_sets() {
        let txn = Transaction::new(IsolationLevel::ReadCommitted);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert!(txn.shared_lock_set().is_empty());
        assert!(txn.exclusive_lock_set().is_empty());
    }

    #[test]
    fn distinct_transactions_get_distinct_ids() {
        let a = Transaction::new(IsolationLevel::ReadCommitted);
        let b = Transaction::new(IsolationLevel::ReadCommitted);
        assert_ne!(a.id(), b.id());
    }
}
