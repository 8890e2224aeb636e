use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{EntryId, Money};

use crate::{DailyAggregate, Result};

/// Result of folding one entry into its day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The entry was new; carries the aggregate after the increment.
    Applied(DailyAggregate),
    /// The entry had already been consolidated; nothing changed.
    Duplicate,
}

/// Storage for daily aggregates and the set of entries folded into them.
///
/// Writers are the consolidation engine (additive, per entry) and the
/// reprocessing orchestrator (whole-day replacement). Increments are atomic
/// per date so concurrent handlers for the same day never lose an update.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Loads the aggregate for a date.
    async fn get_by_date(&self, date: NaiveDate) -> Result<Option<DailyAggregate>>;

    /// Atomically adds the deltas to a date, creating it at zero if absent.
    async fn upsert_additive(
        &self,
        date: NaiveDate,
        credits_delta: Money,
        debits_delta: Money,
    ) -> Result<DailyAggregate>;

    /// Records `entry_id` as consolidated and applies its deltas, in one step.
    ///
    /// Returns [`ApplyOutcome::Duplicate`] without touching the aggregate if
    /// the entry was recorded before.
    async fn apply_entry(
        &self,
        entry_id: EntryId,
        date: NaiveDate,
        credits_delta: Money,
        debits_delta: Money,
    ) -> Result<ApplyOutcome>;

    /// Overwrites the aggregate for its date and records the entries it covers.
    async fn replace(&self, aggregate: &DailyAggregate, entries: &[EntryId]) -> Result<()>;

    /// Aggregates in `[start, end]`, ordered by date. Days without one are absent.
    async fn get_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyAggregate>>;

    /// Whether an entry has been folded into its day.
    async fn is_consolidated(&self, entry_id: EntryId) -> Result<bool>;
}

#[async_trait]
impl<T: AggregateStore + ?Sized> AggregateStore for Arc<T> {
    async fn get_by_date(&self, date: NaiveDate) -> Result<Option<DailyAggregate>> {
        (**self).get_by_date(date).await
    }

    async fn upsert_additive(
        &self,
        date: NaiveDate,
        credits_delta: Money,
        debits_delta: Money,
    ) -> Result<DailyAggregate> {
        (**self).upsert_additive(date, credits_delta, debits_delta).await
    }

    async fn apply_entry(
        &self,
        entry_id: EntryId,
        date: NaiveDate,
        credits_delta: Money,
        debits_delta: Money,
    ) -> Result<ApplyOutcome> {
        (**self)
            .apply_entry(entry_id, date, credits_delta, debits_delta)
            .await
    }

    async fn replace(&self, aggregate: &DailyAggregate, entries: &[EntryId]) -> Result<()> {
        (**self).replace(aggregate, entries).await
    }

    async fn get_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyAggregate>> {
        (**self).get_range(start, end).await
    }

    async fn is_consolidated(&self, entry_id: EntryId) -> Result<bool> {
        (**self).is_consolidated(entry_id).await
    }
}
