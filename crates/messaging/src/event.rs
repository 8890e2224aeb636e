//! The entry-created event carried on the channel.

use chrono::NaiveDate;
use common::{EntryId, Money, Nature};
use ledger::LedgerEntry;
use serde::{Deserialize, Serialize};

use crate::{ChannelError, Result};

/// Published once per committed ledger entry, consumed by consolidation.
///
/// Wire form:
/// `{"entryId": 42, "amount": "150.50", "nature": "C", "date": "2024-04-30"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationEvent {
    pub entry_id: EntryId,
    /// Unsigned magnitude as a decimal string.
    pub amount: Money,
    pub nature: Nature,
    pub date: NaiveDate,
}

impl ConsolidationEvent {
    pub fn new(entry_id: EntryId, amount: Money, nature: Nature, date: NaiveDate) -> Self {
        Self {
            entry_id,
            amount,
            nature,
            date,
        }
    }

    /// Serializes the event into a message body.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a message body, rejecting payloads that break the contract.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let event: ConsolidationEvent = serde_json::from_slice(body)?;
        if event.amount.is_negative() {
            return Err(ChannelError::Malformed(format!(
                "entry {} has negative amount {}",
                event.entry_id, event.amount
            )));
        }
        Ok(event)
    }

    /// Returns the (credits, debits) deltas this event contributes.
    pub fn deltas(&self) -> (Money, Money) {
        match self.nature {
            Nature::Credit => (self.amount, Money::zero()),
            Nature::Debit => (Money::zero(), self.amount),
        }
    }
}

impl From<&LedgerEntry> for ConsolidationEvent {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            entry_id: entry.id,
            amount: entry.amount,
            nature: entry.nature,
            date: entry.date,
        }
    }
}
