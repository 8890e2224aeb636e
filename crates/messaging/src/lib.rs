//! Event channel for entry-created events.
//!
//! This crate provides the transport between the entry-creation boundary
//! and the consolidation consumer:
//! - [`ConsolidationEvent`], the wire payload
//! - [`EventChannel`], a broker abstraction with explicit ack/nack, bounded
//!   redelivery (message TTL) and a dead-letter destination
//! - [`InMemoryBroker`] and [`PostgresBroker`] implementations
//! - [`EventPublisher`] for fire-and-forget publication

pub mod channel;
pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod postgres;
pub mod publisher;
pub mod settings;

pub use channel::EventChannel;
pub use error::{ChannelError, Result};
pub use event::ConsolidationEvent;
pub use memory::InMemoryBroker;
pub use message::{
    DeadLetter, DeadLetterReason, Delivery, DeliveryMode, DeliveryTag, MessageId,
    MessageProperties,
};
pub use postgres::PostgresBroker;
pub use publisher::EventPublisher;
pub use settings::ChannelSettings;
