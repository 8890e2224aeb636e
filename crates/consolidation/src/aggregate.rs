//! Derived per-day read models.

use chrono::NaiveDate;
use common::{Money, Nature};
use ledger::LedgerEntry;
use serde::Serialize;

/// Credits, debits and net balance for one calendar date.
///
/// `balance == total_credits - total_debits` always holds; the fields are
/// only reachable through constructors that maintain it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyAggregate {
    date: NaiveDate,
    total_credits: Money,
    total_debits: Money,
    balance: Money,
}

impl DailyAggregate {
    /// Builds an aggregate from its totals.
    pub fn new(date: NaiveDate, total_credits: Money, total_debits: Money) -> Self {
        Self {
            date,
            total_credits,
            total_debits,
            balance: total_credits - total_debits,
        }
    }

    /// A day with nothing consolidated yet.
    pub fn empty(date: NaiveDate) -> Self {
        Self::new(date, Money::zero(), Money::zero())
    }

    /// Like [`DailyAggregate::new`], but `None` when the balance does not fit.
    pub fn checked_new(date: NaiveDate, total_credits: Money, total_debits: Money) -> Option<Self> {
        let balance = total_credits.checked_sub(total_debits)?;
        Some(Self {
            date,
            total_credits,
            total_debits,
            balance,
        })
    }

    /// Recomputes a day from scratch out of its ledger entries.
    ///
    /// Entries dated elsewhere are ignored. Returns `None` if a total
    /// overflows.
    pub fn from_entries<'a>(
        date: NaiveDate,
        entries: impl IntoIterator<Item = &'a LedgerEntry>,
    ) -> Option<Self> {
        let (credits, debits) = entries
            .into_iter()
            .filter(|e| e.date == date)
            .try_fold((Money::zero(), Money::zero()), |(c, d), e| match e.nature {
                Nature::Credit => Some((c.checked_add(e.amount)?, d)),
                Nature::Debit => Some((c, d.checked_add(e.amount)?)),
            })?;
        Self::checked_new(date, credits, debits)
    }

    /// Returns the aggregate with the deltas added, or `None` on overflow.
    pub fn with_deltas(&self, credits_delta: Money, debits_delta: Money) -> Option<Self> {
        Self::checked_new(
            self.date,
            self.total_credits.checked_add(credits_delta)?,
            self.total_debits.checked_add(debits_delta)?,
        )
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn total_credits(&self) -> Money {
        self.total_credits
    }

    pub fn total_debits(&self) -> Money {
        self.total_debits
    }

    pub fn balance(&self) -> Money {
        self.balance
    }
}

/// Totals summed over the stored aggregates of a date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangeSummary {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub total_credits: Money,
    pub total_debits: Money,
    pub balance: Money,
    /// Number of days in the range that have an aggregate.
    pub days: usize,
}

impl RangeSummary {
    /// `None` if the summed totals overflow.
    pub fn from_aggregates(
        start: NaiveDate,
        end: NaiveDate,
        aggregates: &[DailyAggregate],
    ) -> Option<Self> {
        let sum = |field: fn(&DailyAggregate) -> Money| {
            aggregates
                .iter()
                .try_fold(Money::zero(), |acc, agg| acc.checked_add(field(agg)))
        };
        let total_credits = sum(DailyAggregate::total_credits)?;
        let total_debits = sum(DailyAggregate::total_debits)?;
        Some(Self {
            start,
            end,
            total_credits,
            total_debits,
            balance: total_credits.checked_sub(total_debits)?,
            days: aggregates.len(),
        })
    }
}
