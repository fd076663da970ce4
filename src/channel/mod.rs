//! Durable message channel abstraction.
//!
//! The pipeline talks to its external worker through named, durable queues
//! with manual acknowledgment. The broker itself is an external dependency;
//! this module defines the capability the rest of the crate codes against:
//!
//! - **publish**: durable enqueue of an opaque byte payload
//! - **receive**: blocking pop that parks the payload in an in-flight state
//! - **ack**: removes the in-flight entry once processing resolved
//! - **dead_letter**: terminal disposal for unprocessable payloads
//! - **recover**: returns in-flight entries stranded by a crashed consumer
//!
//! A delivery stays recoverable until it is acked or dead-lettered, which
//! gives the listener at-least-once semantics across crashes.
//!
//! Two implementations are provided: `RedisChannel` (production, backed by
//! Redis lists) and `MemoryChannel` (tests and local development).

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::{DeadLetter, MemoryChannel};
pub use redis::{QueueStats, RedisChannel};

/// Errors that can occur during channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Failed to connect to the broker.
    #[error("Broker connection failed: {0}")]
    ConnectionFailed(String),

    /// Broker operation failed.
    #[error("Broker operation failed: {0}")]
    Broker(#[from] ::redis::RedisError),

    /// Failed to serialize a dead-letter entry.
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// A message pulled from a queue, pending acknowledgment.
///
/// The payload doubles as the in-flight token: acking removes exactly this
/// byte string from the processing state.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Queue the message was received from.
    pub queue: String,
    /// Raw message payload.
    pub payload: Vec<u8>,
}

/// Capability contract for a durable, named queue with manual acknowledgment.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Publishes a payload to the named queue.
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), ChannelError>;

    /// Receives the next message, blocking up to `timeout`.
    ///
    /// Returns `None` if the timeout expired with no message available. The
    /// returned delivery is held in-flight until acked or dead-lettered.
    async fn receive(&self, queue: &str, timeout: Duration)
        -> Result<Option<Delivery>, ChannelError>;

    /// Acknowledges a delivery, removing it from the in-flight state.
    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError>;

    /// Acknowledges a delivery and records it on the dead-letter queue.
    ///
    /// Used for payloads that can never be processed; redelivering them
    /// would loop forever.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), ChannelError>;

    /// Moves in-flight messages stranded by a crashed consumer back to the
    /// ready queue. Returns the number of messages recovered.
    async fn recover(&self, queue: &str) -> Result<usize, ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_error_display() {
        let err = ChannelError::ConnectionFailed("timeout".to_string());
        assert!(err.to_string().contains("timeout"));
    }
}
