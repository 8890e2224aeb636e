//! Applies entry-created events to daily aggregates.

use std::time::{Duration, Instant};

use ledger::LedgerStore;
use messaging::ConsolidationEvent;

use crate::store::{AggregateStore, ApplyOutcome};
use crate::{DailyAggregate, ReadCache};

/// What to tell the broker about a handled delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
    DeadLetter,
}

/// Result of handling one message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The event was new and has been folded into its day.
    Applied(DailyAggregate),
    /// The entry had already been consolidated.
    Duplicate,
    /// The event cannot be processed, ever: undecodable, or its amount
    /// would overflow the day's totals.
    Poison(String),
    /// A store fault; retrying later may succeed.
    Transient(String),
}

impl HandleOutcome {
    pub fn disposition(&self) -> Disposition {
        match self {
            HandleOutcome::Applied(_) | HandleOutcome::Duplicate => Disposition::Ack,
            HandleOutcome::Poison(_) => Disposition::DeadLetter,
            HandleOutcome::Transient(_) => Disposition::Requeue,
        }
    }
}

/// Idempotent consumer for [`ConsolidationEvent`]s.
///
/// Each entry is counted at most once per day: the dedup record and the
/// increment are a single [`AggregateStore::apply_entry`] call. After a
/// successful apply the fresh aggregate is written to the read cache and the
/// ledger entry is flagged processed; failures of either are logged and do
/// not change the outcome.
pub struct ConsolidationEngine<A, C, L> {
    aggregates: A,
    cache: C,
    ledger: L,
    cache_ttl: Duration,
}

impl<A, C, L> ConsolidationEngine<A, C, L>
where
    A: AggregateStore,
    C: ReadCache,
    L: LedgerStore,
{
    pub fn new(aggregates: A, cache: C, ledger: L, cache_ttl: Duration) -> Self {
        Self {
            aggregates,
            cache,
            ledger,
            cache_ttl,
        }
    }

    /// Handles one raw message body.
    ///
    /// Never fails: every fault resolves to an outcome the caller maps to
    /// ack, requeue or dead-letter.
    pub async fn handle(&self, body: &[u8]) -> HandleOutcome {
        let started = Instant::now();
        let outcome = self.handle_inner(body).await;
        metrics::histogram!("consolidation_handle_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        outcome
    }

    async fn handle_inner(&self, body: &[u8]) -> HandleOutcome {
        let event = match ConsolidationEvent::decode(body) {
            Ok(event) => event,
            Err(e) => {
                metrics::counter!("consolidation_events_poison_total").increment(1);
                tracing::warn!(error = %e, bytes = body.len(), "poison message");
                return HandleOutcome::Poison(e.to_string());
            }
        };

        self.apply(&event).await
    }

    /// Applies an already-decoded event.
    #[tracing::instrument(skip(self, event), fields(entry_id = %event.entry_id, date = %event.date))]
    pub async fn apply(&self, event: &ConsolidationEvent) -> HandleOutcome {
        let (credits, debits) = event.deltas();

        let outcome = match self
            .aggregates
            .apply_entry(event.entry_id, event.date, credits, debits)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, "aggregate update failed, will retry");
                return HandleOutcome::Transient(e.to_string());
            }
            Err(e) => {
                metrics::counter!("consolidation_events_poison_total").increment(1);
                tracing::error!(error = %e, "event cannot be applied");
                return HandleOutcome::Poison(e.to_string());
            }
        };

        match outcome {
            ApplyOutcome::Duplicate => {
                metrics::counter!("consolidation_events_duplicate_total").increment(1);
                tracing::debug!("entry already consolidated, no-op");
                HandleOutcome::Duplicate
            }
            ApplyOutcome::Applied(aggregate) => {
                metrics::counter!("consolidation_events_applied_total").increment(1);

                if let Err(e) = self.cache.set(&aggregate, self.cache_ttl).await {
                    metrics::counter!("consolidation_cache_failures_total").increment(1);
                    tracing::warn!(error = %e, "cache refresh failed");
                }
                if let Err(e) = self.ledger.mark_processed(&[event.entry_id]).await {
                    tracing::warn!(error = %e, "failed to flag entry as processed");
                }

                tracing::debug!(balance = %aggregate.balance(), "entry consolidated");
                HandleOutcome::Applied(aggregate)
            }
        }
    }
}
