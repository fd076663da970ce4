//! Redis-backed message channel with reliable delivery.
//!
//! Each named queue maps onto three Redis lists:
//!
//! - `{queue}`: ready messages
//! - `{queue}:processing`: in-flight messages awaiting acknowledgment
//! - `{queue}:dead_letter`: messages disposed of as unprocessable
//!
//! # Reliability
//!
//! `receive` uses BRPOPLPUSH to atomically move a message from the ready
//! list to the processing list. An ack removes it from the processing list;
//! until then a consumer crash leaves the message recoverable via
//! `recover`, which pushes stranded entries back onto the ready list.

use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::{Engine, BASE64_STANDARD};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{ChannelError, Delivery, MessageChannel};

fn processing_key(queue: &str) -> String {
    format!("{}:processing", queue)
}

fn dead_letter_key(queue: &str) -> String {
    format!("{}:dead_letter", queue)
}

/// Message channel backed by Redis lists.
///
/// The connection is a `ConnectionManager` (handles reconnection
/// automatically) owned by the channel and shared by clone, so one
/// long-lived broker connection serves both the submission path and the
/// listener.
#[derive(Clone)]
pub struct RedisChannel {
    redis: ConnectionManager,
}

impl RedisChannel {
    /// Connects to Redis and creates a new channel.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, ChannelError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        Ok(Self { redis })
    }

    /// Creates a channel from an existing connection manager.
    ///
    /// Useful when sharing a connection across components.
    pub fn from_connection(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Returns depth statistics for the named queue.
    pub async fn stats(&self, queue: &str) -> Result<QueueStats, ChannelError> {
        let mut ready_conn = self.redis.clone();
        let mut processing_conn = self.redis.clone();
        let mut dead_conn = self.redis.clone();

        let (ready, processing, dead_letter) = tokio::try_join!(
            ready_conn.llen::<_, usize>(queue),
            processing_conn.llen::<_, usize>(processing_key(queue)),
            dead_conn.llen::<_, usize>(dead_letter_key(queue)),
        )?;

        Ok(QueueStats {
            queue: queue.to_string(),
            ready,
            processing,
            dead_letter,
        })
    }

    /// Clears the ready, processing and dead-letter lists of a queue.
    ///
    /// **Warning**: this permanently deletes all messages. Use with caution.
    pub async fn clear(&self, queue: &str) -> Result<(), ChannelError> {
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.del(queue)
            .del(processing_key(queue))
            .del(dead_letter_key(queue));
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }
}

#[async_trait]
impl MessageChannel for RedisChannel {
    /// Publishes a payload to the named queue.
    ///
    /// Messages are added to the left of the list (LPUSH) so they can be
    /// popped from the right in FIFO order.
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), ChannelError> {
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(queue, payload).await?;
        Ok(())
    }

    async fn receive(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<Delivery>, ChannelError> {
        let mut conn = self.redis.clone();
        let timeout_secs = timeout.as_secs().max(1) as usize;

        // BRPOPLPUSH atomically pops from the ready list and pushes onto the
        // processing list.
        let payload: Option<Vec<u8>> = redis::cmd("BRPOPLPUSH")
            .arg(queue)
            .arg(processing_key(queue))
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        Ok(payload.map(|payload| Delivery {
            queue: queue.to_string(),
            payload,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let mut conn = self.redis.clone();

        // Absence is not an error: the entry may already have been removed
        // by a previous ack for the same payload.
        conn.lrem::<_, _, ()>(
            processing_key(&delivery.queue),
            1,
            delivery.payload.as_slice(),
        )
        .await?;

        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), ChannelError> {
        let mut conn = self.redis.clone();

        let entry = serde_json::json!({
            "payload": BASE64_STANDARD.encode(&delivery.payload),
            "reason": reason,
            "moved_at": chrono::Utc::now().to_rfc3339(),
        });
        let serialized = serde_json::to_string(&entry)?;

        // Remove from processing and record the entry atomically.
        let mut pipe = redis::pipe();
        pipe.atomic()
            .lrem(
                processing_key(&delivery.queue),
                1,
                delivery.payload.as_slice(),
            )
            .lpush(dead_letter_key(&delivery.queue), serialized);
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    async fn recover(&self, queue: &str) -> Result<usize, ChannelError> {
        let mut conn = self.redis.clone();
        let processing = processing_key(queue);
        let mut recovered = 0;

        let stranded: Vec<Vec<u8>> = conn.lrange(&processing, 0, -1).await?;

        for payload in stranded {
            // Atomically move the entry back to the ready list.
            let mut pipe = redis::pipe();
            pipe.atomic()
                .lrem(&processing, 1, payload.as_slice())
                .rpush(queue, payload.as_slice());
            pipe.query_async::<_, ()>(&mut conn).await?;

            recovered += 1;
        }

        Ok(recovered)
    }
}

/// Depth statistics for one queue.
#[derive(Debug, Clone)]
pub struct QueueStats {
    /// Name of the queue.
    pub queue: String,
    /// Messages waiting to be consumed.
    pub ready: usize,
    /// Messages in-flight, awaiting acknowledgment.
    pub processing: usize,
    /// Messages disposed of as unprocessable.
    pub dead_letter: usize,
}

impl QueueStats {
    /// Total number of messages across all three lists.
    pub fn total(&self) -> usize {
        self.ready + self.processing + self.dead_letter
    }
}
