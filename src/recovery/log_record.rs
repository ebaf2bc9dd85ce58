//! Logical log records and the context that chains them (spec §4.6,
//! §3: "Log record"). Grounded on
//! `original_source/src/include/recovery/log_rec.h`'s `CreateInsertLog`
//! family of constructors.
//!
//! Design note §9 ("global mutable test state in the log helper"): the
//! source keeps `prev_lsn_map_`/`next_lsn_` as process-wide statics used
//! by its own test harness. Here that state is [`LogContext`], an
//! explicit object threaded through every constructor instead, so two
//! independent tests (or two recovery managers) never share state.

use std::collections::HashMap;

use crate::concurrency::TransactionId;
use crate::config::INVALID_LSN;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordKind {
    Begin,
    Commit,
    Abort,
    Insert,
    Delete,
    Update,
}

/// `{lsn, prev_lsn, txn_id, kind, old_key?, old_val?, new_key?, new_val?}`.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub lsn: u64,
    pub prev_lsn: u64,
    pub txn_id: TransactionId,
    pub kind: LogRecordKind,
    pub old_key: Option<Vec<u8>>,
    pub old_val: Option<Vec<u8>>,
    pub new_key: Option<Vec<u8>>,
    pub new_val: Option<Vec<u8>>,
}

impl LogRecord {
    fn bare(lsn: u64, prev_lsn: u64, txn_id: TransactionId, kind: LogRecordKind) -> Self {
        Self { lsn, prev_lsn, txn_id, kind, old_key: None, old_val: None, new_key: None, new_val: None }
    }
}

/// Threads monotonically increasing LSNs and each transaction's
/// per-chain `prev_lsn` through record construction. One `LogContext`
/// belongs to exactly one [`crate::recovery::log_manager::LogManager`].
#[derive(Default)]
pub struct LogContext {
    next_lsn: u64,
    /// `txn_id -> last_lsn` for every transaction with an open (not yet
    /// committed/aborted) chain.
    active_chains: HashMap<TransactionId, u64>,
}

impl LogContext {
    pub fn new() -> Self {
        Self { next_lsn: 0, active_chains: HashMap::new() }
    }

    fn next(&mut self) -> u64 {
        let lsn = self.next_lsn;
        self.next_lsn += 1;
        lsn
    }

    pub fn begin(&mut self, txn_id: TransactionId) -> Result<LogRecord> {
        if self.active_chains.contains_key(&txn_id) {
            return Err(Error::Failed(format!("txn {} already has an active log chain", txn_id)));
        }
        let lsn = self.next();
        self.active_chains.insert(txn_id, lsn);
        Ok(LogRecord::bare(lsn, INVALID_LSN, txn_id, LogRecordKind::Begin))
    }

    fn chained(&mut self, txn_id: TransactionId, kind: LogRecordKind) -> Result<LogRecord> {
        let prev_lsn = *self
            .active_chains
            .get(&txn_id)
            .ok_or_else(|| Error::Failed(format!("txn {} has no active log chain", txn_id)))?;
        let lsn = self.next();
        self.active_chains.insert(txn_id, lsn);
        Ok(LogRecord::bare(lsn, prev_lsn, txn_id, kind))
    }

    pub fn insert(&mut self, txn_id: TransactionId, new_key: Vec<u8>, new_val: Vec<u8>) -> Result<LogRecord> {
        let mut record = self.chained(txn_id, LogRecordKind::Insert)?;
        record.new_key = Some(new_key);
        record.new_val = Some(new_val);
        Ok(record)
    }

    pub fn delete(&mut self, txn_id: TransactionId, old_key: Vec<u8>, old_val: Vec<u8>) -> Result<LogRecord> {
        let mut record = self.chained(txn_id, LogRecordKind::Delete)?;
        record.old_key = Some(old_key);
        record.old_val = Some(old_val);
        Ok(record)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        txn_id: TransactionId,
        old_key: Vec<u8>,
        old_val: Vec<u8>,
        new_key: Vec<u8>,
        new_val: Vec<u8>,
    ) -> Result<LogRecord> {
        let mut record = self.chained(txn_id, LogRecordKind::Update)?;
        record.old_key = Some(old_key);
        record.old_val = Some(old_val);
        record.new_key = Some(new_key);
        record.new_val = Some(new_val);
        Ok(record)
    }

    pub fn commit(&mut self, txn_id: TransactionId) -> Result<LogRecord> {
        let record = self.chained(txn_id, LogRecordKind::Commit)?;
        self.active_chains.remove(&txn_id);
        Ok(record)
    }

    pub fn abort(&mut self, txn_id: TransactionId) -> Result<LogRecord> {
        let record = self.chained(txn_id, LogRecordKind::Abort)?;
        self.active_chains.remove(&txn_id);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_begin_for_same_txn_is_rejected() {
        let mut ctx = LogContext::new();
        ctx.begin(1).unwrap();
        assert!(ctx.begin(1).is_err());
    }

    #[test]
    fn write_before_begin_is_rejected() {
        let mut ctx = LogContext::new();
        assert!(ctx.insert(1, vec![1], vec![2]).is_err());
    }

    #[test]
    fn chain_links_prev_lsn_correctly() {
        let mut ctx = LogContext::new();
        let begin = ctx.begin(1).unwrap();
        let insert = ctx.insert(1, vec![1], vec![2]).unwrap();
        assert_eq!(insert.prev_lsn, begin.lsn);
        let commit = ctx.commit(1).unwrap();
        assert_eq!(commit.prev_lsn, insert.lsn);
        assert!(ctx.commit(1).is_err());
    }
}
