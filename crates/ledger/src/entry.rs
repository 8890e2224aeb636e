use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{EntryId, Money, Nature};

/// A category of ledger entry. The entry's nature is taken from its type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryType {
    pub id: i32,
    pub description: String,
    pub nature: Nature,
    pub active: bool,
}

impl EntryType {
    /// Creates an active entry type.
    pub fn new(id: i32, description: impl Into<String>, nature: Nature) -> Self {
        Self {
            id,
            description: description.into(),
            nature,
            active: true,
        }
    }

    /// The types every fresh ledger starts with, matching the schema seed.
    pub fn defaults() -> Vec<EntryType> {
        vec![
            EntryType::new(1, "Credit", Nature::Credit),
            EntryType::new(2, "Debit", Nature::Debit),
        ]
    }
}

/// An immutable financial entry as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Identifier assigned by the store.
    pub id: EntryId,

    pub description: String,

    /// Reference to the [`EntryType`] this entry was recorded under.
    pub entry_type_id: i32,

    /// Unsigned magnitude; the sign is carried by `nature`.
    pub amount: Money,

    pub nature: Nature,

    /// Effective date (date-only granularity).
    pub date: NaiveDate,

    /// Set once the entry is known to be reflected in its daily aggregate.
    pub processed: bool,

    pub created_at: DateTime<Utc>,
}

/// An entry that has not been committed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntry {
    pub description: String,
    pub entry_type_id: i32,
    pub amount: Money,
    pub date: NaiveDate,
}

impl NewEntry {
    /// Creates a new uncommitted entry.
    pub fn new(
        description: impl Into<String>,
        entry_type_id: i32,
        amount: Money,
        date: NaiveDate,
    ) -> Self {
        Self {
            description: description.into(),
            entry_type_id,
            amount,
            date,
        }
    }
}
