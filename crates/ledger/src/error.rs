use thiserror::Error;

use crate::EntryId;

/// Errors that can occur when interacting with the ledger store.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No entry exists with the given ID.
    #[error("Entry not found: {0}")]
    EntryNotFound(EntryId),

    /// The entry references an entry type that does not exist.
    #[error("Entry type not found: {0}")]
    EntryTypeNotFound(i32),

    /// The entry references an entry type that has been deactivated.
    #[error("Entry type {0} is inactive")]
    InactiveEntryType(i32),

    /// The entry failed validation before insert.
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    /// The store could not be reached.
    #[error("Ledger store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl LedgerError {
    /// Returns true for faults that may succeed when retried.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Unavailable(_) => true,
            LedgerError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
