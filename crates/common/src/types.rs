use serde::{Deserialize, Serialize};

use crate::ParseNatureError;

/// Identifier of a ledger entry, assigned by the ledger store on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(i64);

impl EntryId {
    /// Creates an entry ID from its raw value.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EntryId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<EntryId> for i64 {
    fn from(id: EntryId) -> Self {
        id.0
    }
}

/// Whether an entry adds to (credit) or subtracts from (debit) the balance.
///
/// On the wire and in storage a nature is a single character: `C` or `D`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Nature {
    #[serde(rename = "C")]
    Credit,
    #[serde(rename = "D")]
    Debit,
}

impl Nature {
    /// Returns the single-character code.
    pub fn as_char(&self) -> char {
        match self {
            Nature::Credit => 'C',
            Nature::Debit => 'D',
        }
    }

    pub fn is_credit(&self) -> bool {
        matches!(self, Nature::Credit)
    }
}

impl std::fmt::Display for Nature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl TryFrom<char> for Nature {
    type Error = ParseNatureError;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            'C' => Ok(Nature::Credit),
            'D' => Ok(Nature::Debit),
            other => Err(ParseNatureError(other.to_string())),
        }
    }
}

impl std::str::FromStr for Nature {
    type Err = ParseNatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Nature::try_from(c),
            _ => Err(ParseNatureError(s.to_string())),
        }
    }
}
