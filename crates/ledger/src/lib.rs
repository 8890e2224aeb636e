//! Ledger store of record.
//!
//! Entries are immutable once inserted; the only field the consolidation
//! pipeline ever touches afterwards is the `processed` flag.

pub mod entry;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::{EntryId, Money, Nature};
pub use entry::{EntryType, LedgerEntry, NewEntry};
pub use error::{LedgerError, Result};
pub use memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use store::{LedgerStore, validate_new_entry};
