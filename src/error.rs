use std::fmt;

/// Why a transaction was aborted, attached to [`Error::TxnAborted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Deadlock,
    UpgradeConflict,
    LockOnShrinking,
    UnlockOnShrinking,
    LockSharedOnReadUncommitted,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AbortReason::Deadlock => "deadlock",
            AbortReason::UpgradeConflict => "upgrade conflict",
            AbortReason::LockOnShrinking => "lock requested while shrinking",
            AbortReason::UnlockOnShrinking => "double unlock while shrinking",
            AbortReason::LockSharedOnReadUncommitted => {
                "shared lock requested under read-uncommitted"
            }
        };
        write!(f, "{}", s)
    }
}

/// The engine's single closed error type. Every fallible public operation
/// returns `Result<T, Error>`; there is no out-of-band control transfer
/// (panics, exceptions) across subsystem boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Catch-all for I/O and other low-level failures that are logged at
    /// the point of occurrence and surfaced as this variant.
    Failed(String),
    TableAlreadyExist,
    TableNotExist,
    IndexAlreadyExist,
    IndexNotFound,
    ColumnNameNotExist,
    OutOfMemory,
    PageCorrupted,
    DuplicateKey,
    NotFound,
    TxnAborted(AbortReason),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Failed(msg) => write!(f, "failed: {}", msg),
            Error::TableAlreadyExist => write!(f, "table already exists"),
            Error::TableNotExist => write!(f, "table does not exist"),
            Error::IndexAlreadyExist => write!(f, "index already exists"),
            Error::IndexNotFound => write!(f, "index not found"),
            Error::ColumnNameNotExist => write!(f, "column name does not exist"),
            Error::OutOfMemory => write!(f, "out of memory"),
            Error::PageCorrupted => write!(f, "page corrupted"),
            Error::DuplicateKey => write!(f, "duplicate key"),
            Error::NotFound => write!(f, "not found"),
            Error::TxnAborted(reason) => write!(f, "transaction aborted: {}", reason),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Failed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
