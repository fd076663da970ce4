//! In-memory message channel for tests and local development.
//!
//! Implements the same delivery semantics as the Redis channel (ready,
//! in-flight and dead-letter states per queue) without a broker. Tests use
//! the inspection helpers to assert on queue depths and dead-letter
//! contents.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{ChannelError, Delivery, MessageChannel};

/// A message disposed of as unprocessable, with the disposal reason.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// Raw payload of the disposed message.
    pub payload: Vec<u8>,
    /// Why the message was dead-lettered.
    pub reason: String,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Vec<u8>>,
    in_flight: Vec<Vec<u8>>,
    dead_letter: Vec<DeadLetter>,
}

/// In-memory channel with per-queue ready/in-flight/dead-letter state.
#[derive(Default)]
pub struct MemoryChannel {
    queues: Mutex<HashMap<String, QueueState>>,
    notify: Notify,
}

impl MemoryChannel {
    /// Creates an empty channel.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_queue<T>(&self, queue: &str, f: impl FnOnce(&mut QueueState) -> T) -> T {
        let mut queues = self.queues.lock().expect("channel lock poisoned");
        f(queues.entry(queue.to_string()).or_default())
    }

    /// Number of messages waiting to be consumed.
    pub fn ready_len(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.ready.len())
    }

    /// Number of in-flight messages awaiting acknowledgment.
    pub fn in_flight_len(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.in_flight.len())
    }

    /// Snapshot of the queue's dead-letter entries.
    pub fn dead_letters(&self, queue: &str) -> Vec<DeadLetter> {
        self.with_queue(queue, |q| q.dead_letter.clone())
    }
}

#[async_trait]
impl MessageChannel for MemoryChannel {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), ChannelError> {
        self.with_queue(queue, |q| q.ready.push_front(payload.to_vec()));
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<Delivery>, ChannelError> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register for wakeups before checking state, so a publish
            // between the check and the await is not missed.
            let notified = self.notify.notified();

            let popped = self.with_queue(queue, |q| {
                let payload = q.ready.pop_back()?;
                q.in_flight.push(payload.clone());
                Some(payload)
            });

            if let Some(payload) = popped {
                return Ok(Some(Delivery {
                    queue: queue.to_string(),
                    payload,
                }));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        self.with_queue(&delivery.queue, |q| {
            if let Some(pos) = q.in_flight.iter().position(|p| *p == delivery.payload) {
                q.in_flight.remove(pos);
            }
        });
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), ChannelError> {
        self.with_queue(&delivery.queue, |q| {
            if let Some(pos) = q.in_flight.iter().position(|p| *p == delivery.payload) {
                q.in_flight.remove(pos);
            }
            q.dead_letter.push(DeadLetter {
                payload: delivery.payload.clone(),
                reason: reason.to_string(),
            });
        });
        Ok(())
    }

    async fn recover(&self, queue: &str) -> Result<usize, ChannelError> {
        let recovered = self.with_queue(queue, |q| {
            let stranded: Vec<_> = q.in_flight.drain(..).collect();
            let count = stranded.len();
            for payload in stranded {
                // Back of the ready queue, same as the Redis RPUSH recovery:
                // recovered messages are consumed first.
                q.ready.push_back(payload);
            }
            count
        });

        if recovered > 0 {
            self.notify.notify_waiters();
        }

        Ok(recovered)
    }
}
