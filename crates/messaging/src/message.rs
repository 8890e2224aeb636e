//! Messages, deliveries and dead letters.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Consumer-local handle used to ack or nack one delivery.
pub type DeliveryTag = u64;

/// Unique identifier for a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a message must survive a broker restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryMode {
    Transient,
    Persistent,
}

/// Attributes every published message carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageProperties {
    pub delivery_mode: DeliveryMode,
    /// Time-before-dead-letter, counted from `published_at`.
    pub ttl: Duration,
    /// Where the message goes when it expires or is rejected.
    pub dead_letter_exchange: String,
    pub published_at: DateTime<Utc>,
}

/// A message handed to a consumer, awaiting ack or nack.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub message_id: MessageId,
    pub body: Vec<u8>,
    pub properties: MessageProperties,
    /// Number of times this message has been delivered, this delivery included.
    pub attempt: u32,
}

impl Delivery {
    /// True if an earlier delivery of this message was not acknowledged.
    pub fn redelivered(&self) -> bool {
        self.attempt > 1
    }
}

/// Why a message ended up in the dead-letter queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadLetterReason {
    /// Nacked without requeue, or rejected.
    Rejected,
    /// Outlived its TTL without being acknowledged.
    Expired,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::Rejected => "rejected",
            DeadLetterReason::Expired => "expired",
        }
    }
}

impl std::fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeadLetterReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rejected" => Ok(DeadLetterReason::Rejected),
            "expired" => Ok(DeadLetterReason::Expired),
            other => Err(format!("unknown dead-letter reason '{other}'")),
        }
    }
}

/// A message parked in the dead-letter queue.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub message_id: MessageId,
    pub body: Vec<u8>,
    pub reason: DeadLetterReason,
    pub attempts: u32,
    pub published_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
}
