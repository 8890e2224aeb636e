//! Consolidation error types.

use chrono::NaiveDate;
use ledger::LedgerError;
use messaging::ChannelError;
use thiserror::Error;

/// Errors raised by the aggregate store and the consolidation services.
#[derive(Debug, Error)]
pub enum ConsolidationError {
    /// A range query or reprocess request with `start` after `end`.
    #[error("Invalid range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    /// The aggregate store could not be reached.
    #[error("Aggregate store unavailable: {0}")]
    Unavailable(String),

    /// A day's totals would no longer fit in the amount representation.
    #[error("Totals for {date} would overflow")]
    Overflow { date: NaiveDate },

    /// An error from the ledger store.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// An error from the event channel.
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ConsolidationError {
    /// Returns true for faults that may succeed when retried.
    pub fn is_transient(&self) -> bool {
        match self {
            ConsolidationError::InvalidRange { .. } | ConsolidationError::Overflow { .. } => false,
            ConsolidationError::Unavailable(_) => true,
            ConsolidationError::Ledger(e) => e.is_transient(),
            ConsolidationError::Channel(e) => matches!(
                e,
                ChannelError::Unavailable(_) | ChannelError::Database(_)
            ),
            ConsolidationError::Database(e) => match e {
                sqlx::Error::Io(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed => true,
                // Data exceptions (class 22) fail the same way on every retry.
                sqlx::Error::Database(db) => !db.code().is_some_and(|code| code.starts_with("22")),
                _ => false,
            },
        }
    }
}

/// Read cache failure. Always advisory: callers log it and carry on.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// Terminal outcome of a failed reprocess run.
#[derive(Debug, Error)]
pub enum ReprocessError {
    /// Rejected before any write.
    #[error("Invalid range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    /// Rebuilding one date failed; everything up to `last_completed` is done.
    #[error("Reprocessing failed on {date} (last completed: {}): {source}", display_last(.last_completed))]
    DateFailed {
        date: NaiveDate,
        last_completed: Option<NaiveDate>,
        #[source]
        source: ConsolidationError,
    },
}

fn display_last(date: &Option<NaiveDate>) -> String {
    date.map_or_else(|| "none".to_string(), |d| d.to_string())
}

impl ReprocessError {
    /// Date to resume from, if any progress was made.
    pub fn resume_from(&self) -> Option<NaiveDate> {
        match self {
            ReprocessError::InvalidRange { .. } => None,
            ReprocessError::DateFailed { date, .. } => Some(*date),
        }
    }
}

/// Result type for consolidation operations.
pub type Result<T> = std::result::Result<T, ConsolidationError>;
