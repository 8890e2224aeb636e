use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{EntryId, Money};
use tokio::sync::RwLock;

use crate::store::{AggregateStore, ApplyOutcome};
use crate::{ConsolidationError, DailyAggregate, Result};

#[derive(Debug, Default)]
struct AggregateState {
    aggregates: BTreeMap<NaiveDate, DailyAggregate>,
    consolidated: HashMap<EntryId, NaiveDate>,
    writes: u64,
    unavailable: bool,
}

impl AggregateState {
    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(ConsolidationError::Unavailable(
                "in-memory aggregate store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn increment(&mut self, date: NaiveDate, credits: Money, debits: Money) -> Result<DailyAggregate> {
        let updated = self
            .aggregates
            .get(&date)
            .cloned()
            .unwrap_or_else(|| DailyAggregate::empty(date))
            .with_deltas(credits, debits)
            .ok_or(ConsolidationError::Overflow { date })?;
        self.aggregates.insert(date, updated.clone());
        self.writes += 1;
        Ok(updated)
    }
}

/// In-memory aggregate store for tests and single-process runs.
///
/// A single write lock covers the dedup check and the increment, which makes
/// [`AggregateStore::apply_entry`] atomic.
#[derive(Clone, Default)]
pub struct InMemoryAggregateStore {
    state: Arc<RwLock<AggregateState>>,
}

impl InMemoryAggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating operations performed so far.
    pub async fn write_count(&self) -> u64 {
        self.state.read().await.writes
    }

    /// Makes every operation fail with [`ConsolidationError::Unavailable`].
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }
}

#[async_trait]
impl AggregateStore for InMemoryAggregateStore {
    async fn get_by_date(&self, date: NaiveDate) -> Result<Option<DailyAggregate>> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.aggregates.get(&date).cloned())
    }

    async fn upsert_additive(
        &self,
        date: NaiveDate,
        credits_delta: Money,
        debits_delta: Money,
    ) -> Result<DailyAggregate> {
        let mut state = self.state.write().await;
        state.check_available()?;
        state.increment(date, credits_delta, debits_delta)
    }

    async fn apply_entry(
        &self,
        entry_id: EntryId,
        date: NaiveDate,
        credits_delta: Money,
        debits_delta: Money,
    ) -> Result<ApplyOutcome> {
        let mut state = self.state.write().await;
        state.check_available()?;

        if state.consolidated.contains_key(&entry_id) {
            return Ok(ApplyOutcome::Duplicate);
        }
        // Record the entry only once its increment has landed.
        let aggregate = state.increment(date, credits_delta, debits_delta)?;
        state.consolidated.insert(entry_id, date);
        Ok(ApplyOutcome::Applied(aggregate))
    }

    async fn replace(&self, aggregate: &DailyAggregate, entries: &[EntryId]) -> Result<()> {
        let mut state = self.state.write().await;
        state.check_available()?;

        state.aggregates.insert(aggregate.date(), aggregate.clone());
        for id in entries {
            state.consolidated.insert(*id, aggregate.date());
        }
        state.writes += 1;
        Ok(())
    }

    async fn get_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyAggregate>> {
        if start > end {
            return Err(ConsolidationError::InvalidRange { start, end });
        }
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.aggregates.range(start..=end).map(|(_, a)| a.clone()).collect())
    }

    async fn is_consolidated(&self, entry_id: EntryId) -> Result<bool> {
        let state = self.state.read().await;
        state.check_available()?;
        Ok(state.consolidated.contains_key(&entry_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    #[tokio::test]
    async fn upsert_creates_then_increments() {
        let store = InMemoryAggregateStore::new();

        let first = store
            .upsert_additive(date(30), Money::from_cents(15050), Money::zero())
            .await
            .unwrap();
        assert_eq!(first.balance(), Money::from_cents(15050));

        let second = store
            .upsert_additive(date(30), Money::zero(), Money::from_cents(3000))
            .await
            .unwrap();
        assert_eq!(second.balance(), Money::from_cents(12050));
        assert_eq!(store.get_by_date(date(30)).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn apply_entry_is_idempotent_per_entry() {
        let store = InMemoryAggregateStore::new();
        let id = EntryId::new(1);

        let outcome = store
            .apply_entry(id, date(30), Money::from_cents(500), Money::zero())
            .await
            .unwrap();
        assert!(matches!(outcome, ApplyOutcome::Applied(_)));

        let again = store
            .apply_entry(id, date(30), Money::from_cents(500), Money::zero())
            .await
            .unwrap();
        assert_eq!(again, ApplyOutcome::Duplicate);

        let agg = store.get_by_date(date(30)).await.unwrap().unwrap();
        assert_eq!(agg.total_credits(), Money::from_cents(500));
        assert!(store.is_consolidated(id).await.unwrap());
        assert_eq!(store.write_count().await, 1);
    }

    #[tokio::test]
    async fn concurrent_applies_for_one_day_lose_nothing() {
        let store = InMemoryAggregateStore::new();
        let mut handles = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .apply_entry(EntryId::new(i), date(1), Money::from_cents(100), Money::zero())
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let agg = store.get_by_date(date(1)).await.unwrap().unwrap();
        assert_eq!(agg.total_credits(), Money::from_cents(5000));
    }

    #[tokio::test]
    async fn replace_overwrites_and_records_entries() {
        let store = InMemoryAggregateStore::new();
        store
            .upsert_additive(date(1), Money::from_cents(999), Money::zero())
            .await
            .unwrap();

        let rebuilt = DailyAggregate::new(date(1), Money::from_cents(100), Money::from_cents(40));
        store
            .replace(&rebuilt, &[EntryId::new(7), EntryId::new(8)])
            .await
            .unwrap();

        assert_eq!(store.get_by_date(date(1)).await.unwrap(), Some(rebuilt));
        let dup = store
            .apply_entry(EntryId::new(7), date(1), Money::from_cents(100), Money::zero())
            .await
            .unwrap();
        assert_eq!(dup, ApplyOutcome::Duplicate);
    }

    #[tokio::test]
    async fn get_range_is_inclusive_and_ordered() {
        let store = InMemoryAggregateStore::new();
        for d in [3, 1, 5, 2] {
            store
                .upsert_additive(date(d), Money::from_cents(100), Money::zero())
                .await
                .unwrap();
        }

        let range = store.get_range(date(2), date(3)).await.unwrap();
        let dates: Vec<_> = range.iter().map(DailyAggregate::date).collect();
        assert_eq!(dates, vec![date(2), date(3)]);

        assert!(matches!(
            store.get_range(date(3), date(2)).await,
            Err(ConsolidationError::InvalidRange { .. })
        ));
    }

    #[tokio::test]
    async fn overflowing_apply_leaves_entry_unrecorded() {
        let store = InMemoryAggregateStore::new();
        store
            .apply_entry(EntryId::new(1), date(30), Money::from_cents(i64::MAX - 50), Money::zero())
            .await
            .unwrap();

        let err = store
            .apply_entry(EntryId::new(2), date(30), Money::from_cents(100), Money::zero())
            .await
            .unwrap_err();

        assert!(matches!(err, ConsolidationError::Overflow { .. }));
        assert!(!err.is_transient());
        assert!(!store.is_consolidated(EntryId::new(2)).await.unwrap());
        let agg = store.get_by_date(date(30)).await.unwrap().unwrap();
        assert_eq!(agg.total_credits(), Money::from_cents(i64::MAX - 50));
    }

    #[tokio::test]
    async fn unavailable_store_fails_transiently() {
        let store = InMemoryAggregateStore::new();
        store.set_unavailable(true).await;

        let err = store
            .apply_entry(EntryId::new(1), date(1), Money::from_cents(1), Money::zero())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.write_count().await, 0);

        store.set_unavailable(false).await;
        assert!(!store.is_consolidated(EntryId::new(1)).await.unwrap());
    }
}
