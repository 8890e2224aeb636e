//! Rebuilds daily aggregates from the ledger.

use std::time::Duration;

use chrono::NaiveDate;
use common::EntryId;
use ledger::LedgerStore;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::store::AggregateStore;
use crate::{ConsolidationError, DailyAggregate, ReadCache, ReprocessError, Result};

/// What a reprocess run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReprocessReport {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Days whose aggregate was replaced.
    pub dates_rebuilt: Vec<NaiveDate>,
    /// Days with no ledger entries, left untouched.
    pub dates_skipped: Vec<NaiveDate>,
    pub last_completed: Option<NaiveDate>,
    /// True if the run stopped early on cancellation.
    pub cancelled: bool,
}

impl ReprocessReport {
    fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            dates_rebuilt: Vec::new(),
            dates_skipped: Vec::new(),
            last_completed: None,
            cancelled: false,
        }
    }
}

/// Sequential, date-by-date recomputation of aggregates from ledger entries.
///
/// Each date is replaced wholesale, never merged, so a run is idempotent and
/// depends only on ledger contents. Dates without entries are skipped rather
/// than zeroed. The first failing date aborts the run.
pub struct ReprocessingOrchestrator<L, A, C> {
    ledger: L,
    aggregates: A,
    cache: C,
    cache_ttl: Duration,
}

impl<L, A, C> ReprocessingOrchestrator<L, A, C>
where
    L: LedgerStore,
    A: AggregateStore,
    C: ReadCache,
{
    pub fn new(ledger: L, aggregates: A, cache: C, cache_ttl: Duration) -> Self {
        Self {
            ledger,
            aggregates,
            cache,
            cache_ttl,
        }
    }

    /// Rebuilds every date in `[start, end]`.
    pub async fn reprocess(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> std::result::Result<ReprocessReport, ReprocessError> {
        self.reprocess_with_cancel(start, end, &CancellationToken::new())
            .await
    }

    /// Like [`reprocess`](Self::reprocess), checking `cancel` between dates.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn reprocess_with_cancel(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> std::result::Result<ReprocessReport, ReprocessError> {
        if start > end {
            return Err(ReprocessError::InvalidRange { start, end });
        }

        let mut report = ReprocessReport::new(start, end);
        tracing::info!("reprocessing started");

        for date in start.iter_days().take_while(|d| *d <= end) {
            if cancel.is_cancelled() {
                tracing::info!(last_completed = ?report.last_completed, "reprocessing cancelled");
                report.cancelled = true;
                break;
            }

            match self.rebuild_date(date).await {
                Ok(Some(aggregate)) => {
                    metrics::counter!("consolidation_reprocess_dates_total").increment(1);
                    tracing::info!(%date, balance = %aggregate.balance(), "date rebuilt");
                    report.dates_rebuilt.push(date);
                }
                Ok(None) => {
                    metrics::counter!("consolidation_reprocess_skipped_total").increment(1);
                    tracing::warn!(%date, "no ledger entries, leaving aggregate untouched");
                    report.dates_skipped.push(date);
                }
                Err(source) => {
                    tracing::error!(
                        %date,
                        last_completed = ?report.last_completed,
                        error = %source,
                        "reprocessing aborted"
                    );
                    return Err(ReprocessError::DateFailed {
                        date,
                        last_completed: report.last_completed,
                        source,
                    });
                }
            }
            report.last_completed = Some(date);
        }

        tracing::info!(
            rebuilt = report.dates_rebuilt.len(),
            skipped = report.dates_skipped.len(),
            "reprocessing finished"
        );
        Ok(report)
    }

    /// Replaces one day's aggregate. `None` if the ledger has nothing for it.
    ///
    /// An event consolidated between the ledger read and `replace` is
    /// overwritten while its entry stays recorded as consolidated; the day
    /// is only correct again after its next reprocess.
    async fn rebuild_date(&self, date: NaiveDate) -> Result<Option<DailyAggregate>> {
        let entries = self.ledger.entries_by_date(date).await?;
        if entries.is_empty() {
            return Ok(None);
        }

        let aggregate = DailyAggregate::from_entries(date, &entries)
            .ok_or(ConsolidationError::Overflow { date })?;
        let ids: Vec<EntryId> = entries.iter().map(|e| e.id).collect();
        self.aggregates.replace(&aggregate, &ids).await?;

        if let Err(e) = self.cache.set(&aggregate, self.cache_ttl).await {
            metrics::counter!("consolidation_cache_failures_total").increment(1);
            tracing::warn!(%date, error = %e, "cache refresh failed");
        }
        if let Err(e) = self.ledger.mark_processed(&ids).await {
            tracing::warn!(%date, error = %e, "failed to flag entries as processed");
        }

        Ok(Some(aggregate))
    }
}

#[cfg(test)]
mod tests {
    use common::{Money, Nature};
    use ledger::{EntryType, InMemoryLedgerStore, NewEntry};

    use super::*;
    use crate::{DEFAULT_CACHE_TTL, InMemoryAggregateStore, MokaReadCache};

    type Orchestrator =
        ReprocessingOrchestrator<InMemoryLedgerStore, InMemoryAggregateStore, MokaReadCache>;

    struct Fixture {
        orchestrator: Orchestrator,
        ledger: InMemoryLedgerStore,
        aggregates: InMemoryAggregateStore,
        cache: MokaReadCache,
    }

    async fn fixture() -> Fixture {
        let ledger = InMemoryLedgerStore::with_entry_types([
            EntryType::new(1, "Sale", Nature::Credit),
            EntryType::new(2, "Supplier payment", Nature::Debit),
        ])
        .await;
        let aggregates = InMemoryAggregateStore::new();
        let cache = MokaReadCache::default();
        let orchestrator = ReprocessingOrchestrator::new(
            ledger.clone(),
            aggregates.clone(),
            cache.clone(),
            DEFAULT_CACHE_TTL,
        );
        Fixture {
            orchestrator,
            ledger,
            aggregates,
            cache,
        }
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    async fn record(ledger: &InMemoryLedgerStore, type_id: i32, cents: i64, d: u32) {
        ledger
            .insert(NewEntry::new("entry", type_id, Money::from_cents(cents), date(d)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rebuilds_days_from_ledger() {
        let f = fixture().await;
        record(&f.ledger, 1, 15050, 30).await;
        record(&f.ledger, 2, 3000, 30).await;

        let report = f.orchestrator.reprocess(date(30), date(30)).await.unwrap();

        assert_eq!(report.dates_rebuilt, vec![date(30)]);
        assert_eq!(report.last_completed, Some(date(30)));
        let agg = f.aggregates.get_by_date(date(30)).await.unwrap().unwrap();
        assert_eq!(agg.balance().to_string(), "120.50");
        assert_eq!(f.cache.get(date(30)).await.unwrap(), Some(agg));
    }

    #[tokio::test]
    async fn replaces_drifted_aggregate() {
        let f = fixture().await;
        record(&f.ledger, 1, 1000, 1).await;
        f.aggregates
            .upsert_additive(date(1), Money::from_cents(99999), Money::zero())
            .await
            .unwrap();

        f.orchestrator.reprocess(date(1), date(1)).await.unwrap();

        let agg = f.aggregates.get_by_date(date(1)).await.unwrap().unwrap();
        assert_eq!(agg.total_credits(), Money::from_cents(1000));
    }

    #[tokio::test]
    async fn repeated_runs_are_identical() {
        let f = fixture().await;
        record(&f.ledger, 1, 700, 5).await;
        record(&f.ledger, 2, 200, 5).await;

        f.orchestrator.reprocess(date(5), date(5)).await.unwrap();
        let first = f.aggregates.get_by_date(date(5)).await.unwrap();
        f.orchestrator.reprocess(date(5), date(5)).await.unwrap();
        let second = f.aggregates.get_by_date(date(5)).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn empty_day_is_skipped_not_zeroed() {
        let f = fixture().await;
        record(&f.ledger, 1, 500, 1).await;
        let existing = f
            .aggregates
            .upsert_additive(date(2), Money::from_cents(4200), Money::zero())
            .await
            .unwrap();

        let report = f.orchestrator.reprocess(date(1), date(2)).await.unwrap();

        assert_eq!(report.dates_rebuilt, vec![date(1)]);
        assert_eq!(report.dates_skipped, vec![date(2)]);
        assert_eq!(report.last_completed, Some(date(2)));
        assert_eq!(f.aggregates.get_by_date(date(2)).await.unwrap(), Some(existing));
    }

    #[tokio::test]
    async fn inverted_range_writes_nothing() {
        let f = fixture().await;
        record(&f.ledger, 1, 500, 1).await;

        let err = f.orchestrator.reprocess(date(2), date(1)).await.unwrap_err();

        assert!(matches!(err, ReprocessError::InvalidRange { .. }));
        assert_eq!(f.aggregates.write_count().await, 0);
    }

    #[tokio::test]
    async fn failing_date_reports_resume_point() {
        let f = fixture().await;
        record(&f.ledger, 1, 100, 1).await;
        record(&f.ledger, 1, 100, 2).await;
        record(&f.ledger, 1, 100, 3).await;
        f.ledger.fail_on_date(date(2)).await;

        let err = f.orchestrator.reprocess(date(1), date(3)).await.unwrap_err();

        match err {
            ReprocessError::DateFailed {
                date: failed,
                last_completed,
                ref source,
            } => {
                assert_eq!(failed, date(2));
                assert_eq!(last_completed, Some(date(1)));
                assert!(source.is_transient());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(f.aggregates.get_by_date(date(3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overflowing_day_fails_without_replacing() {
        let f = fixture().await;
        record(&f.ledger, 1, 100, 1).await;
        record(&f.ledger, 1, i64::MAX, 2).await;
        record(&f.ledger, 1, 1, 2).await;
        let existing = f
            .aggregates
            .upsert_additive(date(2), Money::from_cents(700), Money::zero())
            .await
            .unwrap();

        let err = f.orchestrator.reprocess(date(1), date(2)).await.unwrap_err();

        match err {
            ReprocessError::DateFailed {
                date: failed,
                last_completed,
                ref source,
            } => {
                assert_eq!(failed, date(2));
                assert_eq!(last_completed, Some(date(1)));
                assert!(matches!(source, ConsolidationError::Overflow { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(f.aggregates.get_by_date(date(2)).await.unwrap(), Some(existing));
    }

    #[tokio::test]
    async fn cancellation_stops_at_date_boundary() {
        let f = fixture().await;
        record(&f.ledger, 1, 100, 1).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = f
            .orchestrator
            .reprocess_with_cancel(date(1), date(3), &cancel)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert!(report.dates_rebuilt.is_empty());
        assert_eq!(report.last_completed, None);
    }

    #[tokio::test]
    async fn rebuilt_entries_are_not_counted_again_by_events() {
        let f = fixture().await;
        record(&f.ledger, 1, 100, 1).await;
        f.orchestrator.reprocess(date(1), date(1)).await.unwrap();

        let entry = f.ledger.entries_by_date(date(1)).await.unwrap().remove(0);
        assert!(entry.processed);
        assert!(f.aggregates.is_consolidated(entry.id).await.unwrap());
    }
}
