//! In-memory append-only log plus checkpoint snapshots (spec §4.6).
//! Grounded on `original_source/src/include/recovery/log_rec.h` for the
//! append/`prev_lsn`-chain shape; the per-process `txn_id -> last_lsn`
//! table lives here rather than as a global, per Design Note §9.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::concurrency::TransactionId;
use crate::error::Result;
use crate::recovery::log_record::{LogContext, LogRecord};

/// Snapshot anchor bounding the redo phase: `{checkpoint_lsn, active_txns,
/// persist_data}` (spec glossary: "Checkpoint").
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub checkpoint_lsn: u64,
    pub active_txns: HashMap<TransactionId, u64>,
    pub persist_data: HashMap<Vec<u8>, Vec<u8>>,
}

struct LogManagerState {
    context: LogContext,
    records: Vec<LogRecord>,
}

/// Owns the totally-ordered sequence of [`LogRecord`]s for one engine
/// instance. All appends go through a single mutex (spec §5: "Log
/// appends are totally ordered by LSN").
pub struct LogManager {
    state: Mutex<LogManagerState>,
}

impl LogManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LogManagerState { context: LogContext::new(), records: Vec::new() }),
        }
    }

    fn append(&self, record: LogRecord) -> u64 {
        let lsn = record.lsn;
        self.state.lock().unwrap().records.push(record);
        lsn
    }

    pub fn log_begin(&self, txn_id: TransactionId) -> Result<u64> {
        let record = self.state.lock().unwrap().context.begin(txn_id)?;
        Ok(self.append(record))
    }

    pub fn log_insert(&self, txn_id: TransactionId, new_key: Vec<u8>, new_val: Vec<u8>) -> Result<u64> {
        let record = self.state.lock().unwrap().context.insert(txn_id, new_key, new_val)?;
        Ok(self.append(record))
    }

    pub fn log_delete(&self, txn_id: TransactionId, old_key: Vec<u8>, old_val: Vec<u8>) -> Result<u64> {
        let record = self.state.lock().unwrap().context.delete(txn_id, old_key, old_val)?;
        Ok(self.append(record))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_update(
        &self,
        txn_id: TransactionId,
        old_key: Vec<u8>,
        old_val: Vec<u8>,
        new_key: Vec<u8>,
        new_val: Vec<u8>,
    ) -> Result<u64> {
        let record = self
            .state
            .lock()
            .unwrap()
            .context
            .update(txn_id, old_key, old_val, new_key, new_val)?;
        Ok(self.append(record))
    }

    pub fn log_commit(&self, txn_id: TransactionId) -> Result<u64> {
        let record = self.state.lock().unwrap().context.commit(txn_id)?;
        Ok(self.append(record))
    }

    pub fn log_abort(&self, txn_id: TransactionId) -> Result<u64> {
        let record = self.state.lock().unwrap().context.abort(txn_id)?;
        Ok(self.append(record))
    }

    /// A point-in-time copy of every record appended so far, in LSN
    /// order. Cheap to call relative to disk I/O; the log lives
    /// entirely in memory per spec §4.6.
    pub fn records(&self) -> Vec<LogRecord> {
        self.state.lock().unwrap().records.clone()
    }

    /// Builds a checkpoint anchored at the most recent LSN appended so
    /// far, given the caller's current view of in-flight transactions
    /// and the committed data image.
    pub fn checkpoint(
        &self,
        active_txns: HashMap<TransactionId, u64>,
        persist_data: HashMap<Vec<u8>, Vec<u8>>,
    ) -> Checkpoint {
        let checkpoint_lsn = self.state.lock().unwrap().records.last().map(|r| r.lsn).unwrap_or(0);
        Checkpoint { checkpoint_lsn, active_txns, persist_data }
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}
