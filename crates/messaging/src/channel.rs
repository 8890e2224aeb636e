use std::sync::Arc;

use async_trait::async_trait;

use crate::{ChannelSettings, DeadLetter, Delivery, DeliveryTag, MessageId, Result};

/// A durable, acknowledged message channel with a dead-letter path.
///
/// Message lifecycle:
/// `Published -> Delivered -> { Acked | Requeued -> Delivered | DeadLettered }`.
///
/// Implementations guarantee that
/// - a message leaves the queue only when acked or dead-lettered,
/// - a message older than the configured TTL is dead-lettered instead of
///   being delivered again,
/// - a delivery that is neither acked nor nacked within the TTL is returned
///   to the queue,
/// - no more than `prefetch` deliveries are outstanding at once.
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Enqueues a persistent message and returns its ID.
    async fn publish(&self, body: Vec<u8>) -> Result<MessageId>;

    /// Waits for the next deliverable message.
    ///
    /// Blocks while the prefetch limit is reached.
    async fn receive(&self) -> Result<Delivery>;

    /// Acknowledges a delivery, removing the message for good.
    async fn ack(&self, tag: DeliveryTag) -> Result<()>;

    /// Negatively acknowledges a delivery.
    ///
    /// With `requeue` the message returns to the queue; without it the
    /// message is dead-lettered.
    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<()>;

    /// Rejects a delivery, routing it to the dead-letter queue.
    async fn reject(&self, tag: DeliveryTag) -> Result<()> {
        self.nack(tag, false).await
    }

    /// Lists the contents of the dead-letter queue, oldest first.
    async fn dead_letters(&self) -> Result<Vec<DeadLetter>>;

    /// Returns the topology and policy this channel was declared with.
    fn settings(&self) -> &ChannelSettings;
}

#[async_trait]
impl<T: EventChannel + ?Sized> EventChannel for Arc<T> {
    async fn publish(&self, body: Vec<u8>) -> Result<MessageId> {
        (**self).publish(body).await
    }

    async fn receive(&self) -> Result<Delivery> {
        (**self).receive().await
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<()> {
        (**self).ack(tag).await
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<()> {
        (**self).nack(tag, requeue).await
    }

    async fn reject(&self, tag: DeliveryTag) -> Result<()> {
        (**self).reject(tag).await
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        (**self).dead_letters().await
    }

    fn settings(&self) -> &ChannelSettings {
        (**self).settings()
    }
}
