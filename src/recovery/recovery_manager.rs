//! Checkpoint-anchored redo then in-memory undo (spec §4.6). Translated
//! directly from `original_source/src/include/recovery/recovery_manager.h`'s
//! `RedoPhase`/`UndoPhase`/`UndoTxn`.
//!
//! Operates over a logical key/value image (spec §3: checkpoint's
//! `persist_data: key -> value`) rather than raw pages, matching how the
//! spec itself describes redo/undo — the concrete target (table heap
//! rows, index entries) applies the same insert/delete/update semantics
//! through whatever encodes its keys and values as bytes.

use std::collections::HashMap;

use crate::concurrency::TransactionId;
use crate::config::INVALID_LSN;
use crate::recovery::log_manager::Checkpoint;
use crate::recovery::log_record::{LogRecord, LogRecordKind};

pub struct RecoveryManager;

impl RecoveryManager {
    /// Runs redo (from `checkpoint.checkpoint_lsn` through the tail of
    /// `records`) followed by undo of whatever transactions are still
    /// active afterward, and returns the resulting key/value image.
    pub fn recover(records: &[LogRecord], checkpoint: &Checkpoint) -> HashMap<Vec<u8>, Vec<u8>> {
        let mut store = checkpoint.persist_data.clone();
        let mut active_txns = checkpoint.active_txns.clone();
        let by_lsn: HashMap<u64, &LogRecord> = records.iter().map(|r| (r.lsn, r)).collect();

        let mut tail: Vec<&LogRecord> = records.iter().filter(|r| r.lsn >= checkpoint.checkpoint_lsn).collect();
        tail.sort_by_key(|r| r.lsn);

        for record in tail {
            Self::redo_one(record, &mut store, &mut active_txns, &by_lsn);
        }

        let still_active: Vec<TransactionId> = active_txns.keys().copied().collect();
        for txn_id in still_active {
            Self::undo_txn(&by_lsn, &mut store, txn_id, &active_txns);
        }
        active_txns.clear();

        store
    }

    fn redo_one(
        record: &LogRecord,
        store: &mut HashMap<Vec<u8>, Vec<u8>>,
        active_txns: &mut HashMap<TransactionId, u64>,
        by_lsn: &HashMap<u64, &LogRecord>,
    ) {
        match record.kind {
            LogRecordKind::Begin => {
                active_txns.insert(record.txn_id, record.lsn);
            }
            LogRecordKind::Insert => {
                if let (Some(key), Some(val)) = (&record.new_key, &record.new_val) {
                    store.insert(key.clone(), val.clone());
                }
                active_txns.insert(record.txn_id, record.lsn);
            }
            LogRecordKind::Delete => {
                if let Some(key) = &record.old_key {
                    store.remove(key);
                }
                active_txns.insert(record.txn_id, record.lsn);
            }
            LogRecordKind::Update => {
                if let (Some(new_key), Some(new_val)) = (&record.new_key, &record.new_val) {
                    if let Some(old_key) = &record.old_key {
                        if old_key != new_key {
                            store.remove(old_key);
                        }
                    }
                    store.insert(new_key.clone(), new_val.clone());
                }
                active_txns.insert(record.txn_id, record.lsn);
            }
            LogRecordKind::Commit => {
                active_txns.remove(&record.txn_id);
            }
            LogRecordKind::Abort => {
                Self::undo_txn(by_lsn, store, record.txn_id, active_txns);
                active_txns.remove(&record.txn_id);
            }
        }
    }

    /// Walks `prev_lsn` backward from the transaction's last known LSN,
    /// inverting each data operation.
    fn undo_txn(
        by_lsn: &HashMap<u64, &LogRecord>,
        store: &mut HashMap<Vec<u8>, Vec<u8>>,
        txn_id: TransactionId,
        active_txns: &HashMap<TransactionId, u64>,
    ) {
        let mut lsn = match active_txns.get(&txn_id) {
            Some(&lsn) => lsn,
            None => return,
        };

        loop {
            let record = match by_lsn.get(&lsn) {
                Some(&r) => r,
                None => break,
            };

            match record.kind {
                LogRecordKind::Insert => {
                    if let Some(new_key) = &record.new_key {
                        store.remove(new_key);
                    }
                }
                LogRecordKind::Delete => {
                    if let (Some(key), Some(val)) = (&record.old_key, &record.old_val) {
                        store.insert(key.clone(), val.clone());
                    }
                }
                LogRecordKind::Update => {
                    if let (Some(key), Some(val)) = (&record.old_key, &record.old_val) {
                        store.insert(key.clone(), val.clone());
                    }
                    if let (Some(new_key), Some(old_key)) = (&record.new_key, &record.old_key) {
                        if new_key != old_key {
                            store.remove(new_key);
                        }
                    }
                }
                LogRecordKind::Begin | LogRecordKind::Commit | LogRecordKind::Abort => {}
            }

            if record.prev_lsn == INVALID_LSN {
                break;
            }
            lsn = record.prev_lsn;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::log_manager::LogManager;

    #[test]
    fn committed_transaction_survives_redo() {
        let lm = LogManager::new();
        lm.log_begin(1).unwrap();
        lm.log_insert(1, b"k".to_vec(), b"v".to_vec()).unwrap();
        lm.log_commit(1).unwrap();

        let checkpoint = lm.checkpoint(HashMap::new(), HashMap::new());
        let store = RecoveryManager::recover(&lm.records(), &checkpoint);
        assert_eq!(store.get(b"k".as_slice()), Some(&b"v".to_vec()));
    }

    #[test]
    fn uncommitted_transaction_is_undone() {
        let lm = LogManager::new();
        lm.log_begin(1).unwrap();
        lm.log_insert(1, b"k".to_vec(), b"v".to_vec()).unwrap();
        // no commit/abort: the transaction is still active when the log ends.

        let checkpoint = lm.checkpoint(HashMap::new(), HashMap::new());
        let store = RecoveryManager::recover(&lm.records(), &checkpoint);
        assert_eq!(store.get(b"k".as_slice()), None);
    }

    #[test]
    fn explicit_abort_is_undone_immediately() {
        let lm = LogManager::new();
        lm.log_begin(1).unwrap();
        lm.log_insert(1, b"k".to_vec(), b"v".to_vec()).unwrap();
        lm.log_abort(1).unwrap();

        let checkpoint = lm.checkpoint(HashMap::new(), HashMap::new());
        let store = RecoveryManager::recover(&lm.records(), &checkpoint);
        assert_eq!(store.get(b"k".as_slice()), None);
    }

    #[test]
    fn update_changing_key_removes_the_old_one_on_redo_and_restores_it_on_undo() {
        let lm = LogManager::new();
        lm.log_begin(1).unwrap();
        lm.log_insert(1, b"old".to_vec(), b"v1".to_vec()).unwrap();
        lm.log_commit(1).unwrap();

        lm.log_begin(2).unwrap();
        lm.log_update(2, b"old".to_vec(), b"v1".to_vec(), b"new".to_vec(), b"v2".to_vec()).unwrap();
        // txn 2 never commits or aborts.

        let checkpoint = lm.checkpoint(HashMap::new(), HashMap::new());
        let store = RecoveryManager::recover(&lm.records(), &checkpoint);
        assert_eq!(store.get(b"old".as_slice()), Some(&b"v1".to_vec()));
        assert_eq!(store.get(b"new".as_slice()), None);
    }
}
