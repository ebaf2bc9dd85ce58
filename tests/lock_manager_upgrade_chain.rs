//! Three readers contend over one row's upgrade path: `T1` and `T2` both
//! try to upgrade a shared lock they hold alongside `T3`'s; only one
//! upgrade may be pending at a time, so `T2` is rejected with
//! `UpgradeConflict` while `T1` waits for `T3` to let go.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use minisql_engine::concurrency::{IsolationLevel, LockManager, Transaction, TransactionId};
use minisql_engine::error::{AbortReason, Error};
use minisql_engine::storage::RowId;

#[test]
fn second_upgrade_request_conflicts_then_first_succeeds_once_the_row_is_freed() {
    let lm = Arc::new(LockManager::new(Duration::from_millis(20)));
    let row = RowId::new(1, 0);

    let mut t1 = Transaction::new(IsolationLevel::ReadCommitted);
    let mut t2 = Transaction::new(IsolationLevel::ReadCommitted);
    let mut t3 = Transaction::new(IsolationLevel::ReadCommitted);

    assert!(lm.lock_shared(&mut t1, row).unwrap());
    assert!(lm.lock_shared(&mut t2, row).unwrap());
    assert!(lm.lock_shared(&mut t3, row).unwrap());

    // T1 requests upgrade; it blocks behind T2 and T3's shared holds.
    let lm1 = Arc::clone(&lm);
    let t1_id: TransactionId = t1.id();
    let upgrade_handle = thread::spawn(move || {
        lm1.lock_upgrade(&mut t1, row).unwrap();
        assert!(t1.exclusive_lock_set().contains(&row));
        t1
    });
    thread::sleep(Duration::from_millis(50));
    assert!(!upgrade_handle.is_finished());

    // T2's own upgrade request conflicts with T1's already-pending one.
    let err = lm.lock_upgrade(&mut t2, row).unwrap_err();
    assert_eq!(err, Error::TxnAborted(AbortReason::UpgradeConflict));
    lm.release_all(&mut t2);

    // T3 unlocks; T1's upgrade still needs sharing_count == 1, so T2's
    // lock (released above) must also be gone before T1 can proceed.
    lm.unlock(&mut t3, row).unwrap();

    let t1 = upgrade_handle.join().unwrap();
    assert!(t1.exclusive_lock_set().contains(&row));
    let _ = t1_id;
}
