use thiserror::Error;

use crate::DeliveryTag;

/// Errors that can occur when interacting with the event channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The event could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The message body parsed but violates the event contract.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Ack or nack for a delivery this consumer does not hold.
    #[error("Unknown delivery tag: {0}")]
    UnknownDeliveryTag(DeliveryTag),

    /// The broker could not be reached.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// The channel has been closed.
    #[error("Channel closed")]
    Closed,

    /// A database error occurred in a database-backed broker.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ChannelError {
    /// Returns true if the payload itself is bad, so retrying cannot help.
    pub fn is_poison(&self) -> bool {
        matches!(self, ChannelError::Serialization(_) | ChannelError::Malformed(_))
    }
}

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
