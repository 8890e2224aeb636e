//! Broker topology and delivery policy.

use std::time::Duration;

/// Default time a message may live before it is dead-lettered.
pub const DEFAULT_MESSAGE_TTL: Duration = Duration::from_millis(30_000);

/// Default number of unacknowledged deliveries a consumer may hold.
pub const DEFAULT_PREFETCH: usize = 100;

/// Names and limits for the consolidation queue and its dead-letter path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    /// Fanout exchange entry-created events are published to.
    pub exchange: String,
    /// Queue the consolidation consumer reads from.
    pub queue: String,
    /// Exchange expired or rejected messages are routed to.
    pub dead_letter_exchange: String,
    /// Queue bound to the dead-letter exchange.
    pub dead_letter_queue: String,
    /// Lifetime of a message, counted from publication and kept across requeues.
    pub message_ttl: Duration,
    /// Max unacknowledged deliveries in flight per consumer.
    pub prefetch: usize,
    /// Delay before a requeued message becomes deliverable again.
    pub redelivery_delay: Duration,
    /// How often a polling broker checks for new messages.
    pub poll_interval: Duration,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            exchange: "entries.exchange".to_string(),
            queue: "consolidation.queue".to_string(),
            dead_letter_exchange: "entries.dlx".to_string(),
            dead_letter_queue: "consolidation.dlq".to_string(),
            message_ttl: DEFAULT_MESSAGE_TTL,
            prefetch: DEFAULT_PREFETCH,
            redelivery_delay: Duration::from_secs(1),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl ChannelSettings {
    pub fn with_message_ttl(mut self, ttl: Duration) -> Self {
        self.message_ttl = ttl;
        self
    }

    /// Sets the prefetch limit. Zero is raised to one.
    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_dead_letter_queue(mut self, queue: impl Into<String>) -> Self {
        self.dead_letter_queue = queue.into();
        self
    }
}
