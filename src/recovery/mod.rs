//! ARIES-style logical recovery (spec §4.6): an append-only log of
//! [`log_record::LogRecord`]s, a [`log_manager::LogManager`] that owns
//! the log and checkpoint snapshots, and a [`recovery_manager::RecoveryManager`]
//! that replays it after a crash.

pub mod log_manager;
pub mod log_record;
pub mod recovery_manager;

pub use log_manager::{Checkpoint, LogManager};
pub use log_record::{LogContext, LogRecord, LogRecordKind};
pub use recovery_manager::RecoveryManager;
