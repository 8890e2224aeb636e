use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::{
    ChannelError, ChannelSettings, DeadLetter, DeadLetterReason, Delivery, DeliveryMode,
    DeliveryTag, EventChannel, MessageId, MessageProperties, Result,
};

#[derive(Debug, Clone)]
struct QueuedMessage {
    id: MessageId,
    body: Vec<u8>,
    properties: MessageProperties,
    expires_at: Instant,
    visible_at: Instant,
    attempts: u32,
}

#[derive(Debug)]
struct InFlight {
    message: QueuedMessage,
    lease_until: Instant,
}

#[derive(Debug, Default)]
struct BrokerState {
    ready: VecDeque<QueuedMessage>,
    in_flight: HashMap<DeliveryTag, InFlight>,
    dead_letters: Vec<DeadLetter>,
    next_tag: DeliveryTag,
    acked: u64,
    unavailable: bool,
    closed: bool,
}

impl BrokerState {
    fn dead_letter(&mut self, message: QueuedMessage, reason: DeadLetterReason) {
        tracing::warn!(
            message_id = %message.id,
            attempts = message.attempts,
            %reason,
            "message dead-lettered"
        );
        metrics::counter!("messaging_dead_lettered_total", "reason" => reason.as_str())
            .increment(1);
        self.dead_letters.push(DeadLetter {
            message_id: message.id,
            body: message.body,
            reason,
            attempts: message.attempts,
            published_at: message.properties.published_at,
            dead_lettered_at: Utc::now(),
        });
    }

    /// Returns stale leases to the queue and dead-letters expired messages.
    fn sweep(&mut self, now: Instant) {
        let stale: Vec<DeliveryTag> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.lease_until <= now)
            .map(|(tag, _)| *tag)
            .collect();
        for tag in stale {
            if let Some(flight) = self.in_flight.remove(&tag) {
                tracing::warn!(
                    delivery_tag = tag,
                    message_id = %flight.message.id,
                    "delivery not settled within TTL, returning to queue"
                );
                let mut message = flight.message;
                message.visible_at = now;
                self.ready.push_back(message);
            }
        }

        let (expired, live): (Vec<_>, Vec<_>) = self
            .ready
            .drain(..)
            .partition(|m| m.expires_at <= now);
        self.ready = live.into();
        for message in expired {
            self.dead_letter(message, DeadLetterReason::Expired);
        }
    }

    /// How long a blocked receiver should sleep before re-checking.
    fn next_wakeup(&self, now: Instant, has_capacity: bool) -> Option<Duration> {
        let ready_times = self.ready.iter().flat_map(|m| {
            let visible = has_capacity.then_some(m.visible_at);
            visible.into_iter().chain(std::iter::once(m.expires_at))
        });
        let lease_times = self.in_flight.values().map(|f| f.lease_until);

        ready_times
            .chain(lease_times)
            .min()
            .map(|at| at.saturating_duration_since(now))
    }
}

/// In-memory broker for tests and single-process runs.
///
/// Honours the full channel contract (acks, requeue, TTL expiry,
/// dead-lettering, prefetch) but keeps messages in process memory, so
/// they do not survive a restart. Use [`PostgresBroker`](crate::PostgresBroker)
/// when durability is required.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
    settings: Arc<ChannelSettings>,
}

impl InMemoryBroker {
    /// Declares a broker with the given settings.
    pub fn new(settings: ChannelSettings) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            notify: Arc::new(Notify::new()),
            settings: Arc::new(settings),
        }
    }

    /// Number of messages waiting for delivery.
    pub async fn ready_count(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    /// Number of deliveries awaiting ack or nack.
    pub async fn in_flight_count(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    /// Number of messages acknowledged so far.
    pub async fn acked_count(&self) -> u64 {
        self.state.lock().await.acked
    }

    /// Makes publish and receive fail with [`ChannelError::Unavailable`].
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
        self.notify.notify_waiters();
    }

    /// Closes the broker; blocked and future receivers get [`ChannelError::Closed`].
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    async fn settle(&self, tag: DeliveryTag) -> Result<(tokio::sync::MutexGuard<'_, BrokerState>, QueuedMessage)> {
        let mut state = self.state.lock().await;
        let flight = state
            .in_flight
            .remove(&tag)
            .ok_or(ChannelError::UnknownDeliveryTag(tag))?;
        Ok((state, flight.message))
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(ChannelSettings::default())
    }
}

#[async_trait]
impl EventChannel for InMemoryBroker {
    async fn publish(&self, body: Vec<u8>) -> Result<MessageId> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ChannelError::Closed);
        }
        if state.unavailable {
            return Err(ChannelError::Unavailable(
                "in-memory broker marked unavailable".to_string(),
            ));
        }

        let now = Instant::now();
        let id = MessageId::new();
        state.ready.push_back(QueuedMessage {
            id,
            body,
            properties: MessageProperties {
                delivery_mode: DeliveryMode::Persistent,
                ttl: self.settings.message_ttl,
                dead_letter_exchange: self.settings.dead_letter_exchange.clone(),
                published_at: Utc::now(),
            },
            expires_at: now + self.settings.message_ttl,
            visible_at: now,
            attempts: 0,
        });
        drop(state);

        self.notify.notify_one();
        Ok(id)
    }

    async fn receive(&self) -> Result<Delivery> {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(ChannelError::Closed);
                }
                if state.unavailable {
                    return Err(ChannelError::Unavailable(
                        "in-memory broker marked unavailable".to_string(),
                    ));
                }

                let now = Instant::now();
                state.sweep(now);

                let has_capacity = state.in_flight.len() < self.settings.prefetch;
                let next = if has_capacity {
                    state.ready.iter().position(|m| m.visible_at <= now)
                } else {
                    None
                };

                if let Some(mut message) = next.and_then(|pos| state.ready.remove(pos)) {
                    state.next_tag += 1;
                    let tag = state.next_tag;
                    message.attempts += 1;

                    let delivery = Delivery {
                        tag,
                        message_id: message.id,
                        body: message.body.clone(),
                        properties: message.properties.clone(),
                        attempt: message.attempts,
                    };
                    state.in_flight.insert(
                        tag,
                        InFlight {
                            message,
                            lease_until: now + self.settings.message_ttl,
                        },
                    );
                    return Ok(delivery);
                }

                state.next_wakeup(now, has_capacity)
            };

            match wait {
                Some(duration) => {
                    tokio::select! {
                        () = self.notify.notified() => {}
                        () = tokio::time::sleep(duration) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<()> {
        let (mut state, _) = self.settle(tag).await?;
        state.acked += 1;
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool) -> Result<()> {
        let (mut state, mut message) = self.settle(tag).await?;
        let now = Instant::now();

        if !requeue {
            state.dead_letter(message, DeadLetterReason::Rejected);
        } else if message.expires_at <= now {
            state.dead_letter(message, DeadLetterReason::Expired);
        } else {
            message.visible_at = now + self.settings.redelivery_delay;
            state.ready.push_back(message);
        }
        drop(state);

        self.notify.notify_one();
        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        Ok(self.state.lock().await.dead_letters.clone())
    }

    fn settings(&self) -> &ChannelSettings {
        &self.settings
    }
}
