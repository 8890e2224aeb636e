use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{EntryId, EntryType, LedgerEntry, LedgerError, NewEntry, Result};

/// Core trait for ledger store implementations.
///
/// The ledger is the source of truth for every amount the consolidation
/// pipeline derives. All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Inserts a new entry and returns it as committed, with its assigned ID.
    ///
    /// The entry's nature is resolved from its entry type; unknown or
    /// inactive types are rejected.
    async fn insert(&self, entry: NewEntry) -> Result<LedgerEntry>;

    /// Retrieves a single entry by ID.
    async fn get_entry(&self, id: EntryId) -> Result<Option<LedgerEntry>>;

    /// Retrieves every entry effective on `date`, ordered by ID.
    async fn entries_by_date(&self, date: NaiveDate) -> Result<Vec<LedgerEntry>>;

    /// Sets the processed flag on the given entries. Unknown IDs are ignored.
    async fn mark_processed(&self, ids: &[EntryId]) -> Result<()>;

    /// Retrieves an entry type by ID.
    async fn get_entry_type(&self, id: i32) -> Result<Option<EntryType>>;

    /// Registers or replaces an entry type.
    async fn add_entry_type(&self, entry_type: EntryType) -> Result<()>;
}

#[async_trait]
impl<T: LedgerStore + ?Sized> LedgerStore for Arc<T> {
    async fn insert(&self, entry: NewEntry) -> Result<LedgerEntry> {
        (**self).insert(entry).await
    }

    async fn get_entry(&self, id: EntryId) -> Result<Option<LedgerEntry>> {
        (**self).get_entry(id).await
    }

    async fn entries_by_date(&self, date: NaiveDate) -> Result<Vec<LedgerEntry>> {
        (**self).entries_by_date(date).await
    }

    async fn mark_processed(&self, ids: &[EntryId]) -> Result<()> {
        (**self).mark_processed(ids).await
    }

    async fn get_entry_type(&self, id: i32) -> Result<Option<EntryType>> {
        (**self).get_entry_type(id).await
    }

    async fn add_entry_type(&self, entry_type: EntryType) -> Result<()> {
        (**self).add_entry_type(entry_type).await
    }
}

/// Validates an entry before insert.
pub fn validate_new_entry(entry: &NewEntry) -> Result<()> {
    if entry.description.trim().is_empty() {
        return Err(LedgerError::InvalidEntry(
            "description must not be empty".to_string(),
        ));
    }
    if !entry.amount.is_positive() {
        return Err(LedgerError::InvalidEntry(format!(
            "amount must be positive, got {}",
            entry.amount
        )));
    }
    Ok(())
}

/// Checks that an entry type exists and is active.
pub(crate) fn require_active(entry_type: Option<EntryType>, id: i32) -> Result<EntryType> {
    match entry_type {
        Some(t) if t.active => Ok(t),
        Some(_) => Err(LedgerError::InactiveEntryType(id)),
        None => Err(LedgerError::EntryTypeNotFound(id)),
    }
}
