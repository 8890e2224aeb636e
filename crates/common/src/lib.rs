//! Shared value types used across the ledger, messaging and consolidation crates.

pub mod error;
pub mod money;
pub mod types;

pub use error::{ParseMoneyError, ParseNatureError};
pub use money::Money;
pub use types::{EntryId, Nature};
