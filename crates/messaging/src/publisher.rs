use tokio::task::JoinHandle;

use crate::{ConsolidationEvent, EventChannel, MessageId, Result};

/// Publishes entry-created events onto an [`EventChannel`].
///
/// The entry-creation path never waits on the broker: use
/// [`publish_detached`](Self::publish_detached) there, and failures are
/// logged and counted instead of surfaced. A lost event is recovered by
/// reprocessing the affected date.
#[derive(Clone)]
pub struct EventPublisher<C> {
    channel: C,
}

impl<C: EventChannel> EventPublisher<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Serializes and publishes one event, waiting for the broker to accept it.
    #[tracing::instrument(skip(self, event), fields(entry_id = %event.entry_id, date = %event.date))]
    pub async fn publish(&self, event: &ConsolidationEvent) -> Result<MessageId> {
        let body = event.encode()?;
        let message_id = self.channel.publish(body).await?;

        metrics::counter!("consolidation_events_published_total").increment(1);
        tracing::debug!(%message_id, "event published");
        Ok(message_id)
    }
}

impl<C: EventChannel + Clone + 'static> EventPublisher<C> {
    /// Publishes in the background and returns immediately.
    ///
    /// The returned handle completes once the attempt has finished; callers
    /// are free to drop it.
    pub fn publish_detached(&self, event: ConsolidationEvent) -> JoinHandle<()> {
        let publisher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = publisher.publish(&event).await {
                metrics::counter!("consolidation_publish_failures_total").increment(1);
                tracing::error!(
                    entry_id = %event.entry_id,
                    date = %event.date,
                    error = %e,
                    "failed to publish entry-created event"
                );
            }
        })
    }
}
