use std::sync::Arc;
use std::time::Duration;

use ledger::LedgerStore;
use messaging::{ChannelError, Delivery, EventChannel};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::store::AggregateStore;
use crate::{ConsolidationEngine, Disposition, ReadCache};

/// Pause after a failed `receive` before asking the broker again.
const RECEIVE_BACKOFF: Duration = Duration::from_millis(500);

/// Long-lived consumer feeding the event channel into the engine.
///
/// At most `concurrency` handlers run at once (by default the channel's
/// prefetch). Cancellation stops the loop between messages; handlers already
/// running are drained to ack or nack before [`run`](Self::run) returns.
pub struct ConsolidationWorker<Ch, A, C, L> {
    channel: Ch,
    engine: Arc<ConsolidationEngine<A, C, L>>,
    concurrency: usize,
}

impl<Ch, A, C, L> ConsolidationWorker<Ch, A, C, L>
where
    Ch: EventChannel + Clone + 'static,
    A: AggregateStore + 'static,
    C: ReadCache + 'static,
    L: LedgerStore + 'static,
{
    pub fn new(channel: Ch, engine: Arc<ConsolidationEngine<A, C, L>>) -> Self {
        let concurrency = channel.settings().prefetch;
        Self {
            channel,
            engine,
            concurrency,
        }
    }

    /// Overrides the handler pool size. Zero is raised to one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Runs the worker on its own task.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Consumes until cancelled or the channel closes.
    pub async fn run(self, cancel: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handlers = JoinSet::new();
        tracing::info!(concurrency = self.concurrency, "consolidation worker started");

        loop {
            while let Some(joined) = handlers.try_join_next() {
                log_join(joined);
            }

            let permit = tokio::select! {
                () = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let received = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                received = self.channel.receive() => received,
            };

            match received {
                Ok(delivery) => {
                    let channel = self.channel.clone();
                    let engine = Arc::clone(&self.engine);
                    handlers.spawn(async move {
                        let _permit = permit;
                        handle_delivery(&channel, &engine, delivery).await;
                    });
                }
                Err(ChannelError::Closed) => {
                    tracing::info!("event channel closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "receive failed, backing off");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(RECEIVE_BACKOFF) => {}
                    }
                }
            }
        }

        let in_flight = handlers.len();
        tracing::info!(in_flight, "consolidation worker stopping, draining handlers");
        while let Some(joined) = handlers.join_next().await {
            log_join(joined);
        }
        tracing::info!("consolidation worker stopped");
    }
}

#[tracing::instrument(skip_all, fields(delivery_tag = delivery.tag, attempt = delivery.attempt))]
async fn handle_delivery<Ch, A, C, L>(
    channel: &Ch,
    engine: &ConsolidationEngine<A, C, L>,
    delivery: Delivery,
) where
    Ch: EventChannel,
    A: AggregateStore,
    C: ReadCache,
    L: LedgerStore,
{
    let outcome = engine.handle(&delivery.body).await;

    let settled = match outcome.disposition() {
        Disposition::Ack => channel.ack(delivery.tag).await,
        Disposition::Requeue => {
            metrics::counter!("consolidation_events_requeued_total").increment(1);
            channel.nack(delivery.tag, true).await
        }
        Disposition::DeadLetter => channel.reject(delivery.tag).await,
    };

    if let Err(e) = settled {
        // The lease runs out and the broker redelivers.
        tracing::warn!(error = %e, "failed to settle delivery");
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "consolidation handler panicked");
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use common::{EntryId, Money, Nature};
    use ledger::InMemoryLedgerStore;
    use messaging::{
        ChannelSettings, ConsolidationEvent, DeadLetterReason, EventPublisher, InMemoryBroker,
    };

    use super::*;
    use crate::{DEFAULT_CACHE_TTL, InMemoryAggregateStore, MokaReadCache};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, 30).unwrap()
    }

    fn event(id: i64, cents: i64, nature: Nature) -> ConsolidationEvent {
        ConsolidationEvent::new(EntryId::new(id), Money::from_cents(cents), nature, day())
    }

    fn start(
        broker: &InMemoryBroker,
        aggregates: &InMemoryAggregateStore,
    ) -> (CancellationToken, JoinHandle<()>) {
        let engine = Arc::new(ConsolidationEngine::new(
            aggregates.clone(),
            MokaReadCache::default(),
            InMemoryLedgerStore::new(),
            DEFAULT_CACHE_TTL,
        ));
        let cancel = CancellationToken::new();
        let handle = ConsolidationWorker::new(broker.clone(), engine).spawn(cancel.clone());
        (cancel, handle)
    }

    async fn wait_until_settled(broker: &InMemoryBroker) {
        for _ in 0..200 {
            if broker.ready_count().await == 0 && broker.in_flight_count().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("broker did not drain");
    }

    #[tokio::test]
    async fn consumes_and_acks_events() {
        let broker = InMemoryBroker::new(ChannelSettings::default().with_prefetch(4));
        let aggregates = InMemoryAggregateStore::new();
        let (cancel, handle) = start(&broker, &aggregates);

        let publisher = EventPublisher::new(broker.clone());
        publisher.publish(&event(1, 15050, Nature::Credit)).await.unwrap();
        publisher.publish(&event(2, 3000, Nature::Debit)).await.unwrap();
        publisher.publish(&event(2, 3000, Nature::Debit)).await.unwrap();

        wait_until_settled(&broker).await;
        cancel.cancel();
        handle.await.unwrap();

        let agg = aggregates.get_by_date(day()).await.unwrap().unwrap();
        assert_eq!(agg.balance().to_string(), "120.50");
        assert_eq!(broker.acked_count().await, 3);
    }

    #[tokio::test]
    async fn poison_goes_to_dead_letter() {
        let broker = InMemoryBroker::new(ChannelSettings::default());
        let aggregates = InMemoryAggregateStore::new();
        let (cancel, handle) = start(&broker, &aggregates);

        broker.publish(b"{broken".to_vec()).await.unwrap();

        wait_until_settled(&broker).await;
        cancel.cancel();
        handle.await.unwrap();

        let dead = broker.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, DeadLetterReason::Rejected);
        assert_eq!(aggregates.write_count().await, 0);
    }

    #[tokio::test]
    async fn transient_fault_is_retried_until_store_recovers() {
        let broker = InMemoryBroker::new(
            ChannelSettings::default().with_redelivery_delay(Duration::from_millis(20)),
        );
        let aggregates = InMemoryAggregateStore::new();
        aggregates.set_unavailable(true).await;
        let (cancel, handle) = start(&broker, &aggregates);

        EventPublisher::new(broker.clone())
            .publish(&event(1, 500, Nature::Credit))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(broker.acked_count().await, 0);
        aggregates.set_unavailable(false).await;

        wait_until_settled(&broker).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(broker.acked_count().await, 1);
        assert!(broker.dead_letters().await.unwrap().is_empty());
        let agg = aggregates.get_by_date(day()).await.unwrap().unwrap();
        assert_eq!(agg.total_credits(), Money::from_cents(500));
    }

    #[tokio::test]
    async fn stops_when_channel_closes() {
        let broker = InMemoryBroker::new(ChannelSettings::default());
        let aggregates = InMemoryAggregateStore::new();
        let (_cancel, handle) = start(&broker, &aggregates);

        broker.close().await;

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker exits on close")
            .unwrap();
    }

    #[tokio::test]
    async fn cancellation_leaves_unreceived_messages_queued() {
        let broker = InMemoryBroker::new(ChannelSettings::default());
        let aggregates = InMemoryAggregateStore::new();
        let (cancel, handle) = start(&broker, &aggregates);

        cancel.cancel();
        handle.await.unwrap();
        broker.publish(event(1, 100, Nature::Credit).encode().unwrap()).await.unwrap();

        assert_eq!(broker.ready_count().await, 1);
        assert_eq!(aggregates.write_count().await, 0);
    }
}
