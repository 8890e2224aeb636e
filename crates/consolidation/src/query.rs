//! Read side: daily balances, range reports and reprocess triggers.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use ledger::LedgerStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::store::AggregateStore;
use crate::{
    ConsolidationError, DailyAggregate, RangeSummary, ReadCache, ReprocessError, ReprocessReport,
    ReprocessingOrchestrator, Result,
};

/// Answer to a reprocess request.
#[derive(Debug)]
pub enum ReprocessTicket {
    /// The run was started in the background.
    Accepted(JoinHandle<std::result::Result<ReprocessReport, ReprocessError>>),
    /// The request was refused before anything ran.
    Rejected(ReprocessError),
}

impl ReprocessTicket {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ReprocessTicket::Accepted(_))
    }
}

/// Query surface over the aggregate store and read cache.
pub struct BalanceService<A, C, L> {
    aggregates: A,
    cache: C,
    orchestrator: Arc<ReprocessingOrchestrator<L, A, C>>,
    cache_ttl: Duration,
    shutdown: CancellationToken,
}

impl<A, C, L> BalanceService<A, C, L>
where
    A: AggregateStore + Clone + 'static,
    C: ReadCache + Clone + 'static,
    L: LedgerStore + 'static,
{
    pub fn new(aggregates: A, cache: C, ledger: L, cache_ttl: Duration) -> Self {
        let orchestrator = Arc::new(ReprocessingOrchestrator::new(
            ledger,
            aggregates.clone(),
            cache.clone(),
            cache_ttl,
        ));
        Self {
            aggregates,
            cache,
            orchestrator,
            cache_ttl,
            shutdown: CancellationToken::new(),
        }
    }

    /// Background reprocess runs stop at the next date once `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn orchestrator(&self) -> &ReprocessingOrchestrator<L, A, C> {
        &self.orchestrator
    }

    /// Cache-aside read of one day.
    ///
    /// A cache error is treated as a miss; a store hit repopulates the cache.
    #[tracing::instrument(skip(self))]
    pub async fn get_daily_aggregate(&self, date: NaiveDate) -> Result<Option<DailyAggregate>> {
        match self.cache.get(date).await {
            Ok(Some(aggregate)) => {
                metrics::counter!("consolidation_cache_hits_total").increment(1);
                return Ok(Some(aggregate));
            }
            Ok(None) => {
                metrics::counter!("consolidation_cache_misses_total").increment(1);
            }
            Err(e) => {
                metrics::counter!("consolidation_cache_failures_total").increment(1);
                tracing::warn!(error = %e, "cache read failed, falling back to store");
            }
        }

        let aggregate = self.aggregates.get_by_date(date).await?;
        if let Some(aggregate) = &aggregate {
            if let Err(e) = self.cache.set(aggregate, self.cache_ttl).await {
                metrics::counter!("consolidation_cache_failures_total").increment(1);
                tracing::warn!(error = %e, "cache populate failed");
            }
        }
        Ok(aggregate)
    }

    /// Sums stored aggregates over `[start, end]`. Bypasses the cache.
    #[tracing::instrument(skip(self))]
    pub async fn get_range_summary(&self, start: NaiveDate, end: NaiveDate) -> Result<RangeSummary> {
        if start > end {
            return Err(ConsolidationError::InvalidRange { start, end });
        }
        let aggregates = self.aggregates.get_range(start, end).await?;
        RangeSummary::from_aggregates(start, end, &aggregates)
            .ok_or(ConsolidationError::Overflow { date: end })
    }

    /// Validates the range and starts a detached reprocess run.
    pub fn trigger_reprocess(&self, start: NaiveDate, end: NaiveDate) -> ReprocessTicket {
        if start > end {
            tracing::warn!(%start, %end, "reprocess rejected: invalid range");
            return ReprocessTicket::Rejected(ReprocessError::InvalidRange { start, end });
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let shutdown = self.shutdown.clone();
        tracing::info!(%start, %end, "reprocess accepted");
        ReprocessTicket::Accepted(tokio::spawn(async move {
            orchestrator
                .reprocess_with_cancel(start, end, &shutdown)
                .await
        }))
    }
}
