//! Result listener: consumes worker results and reconciles them into
//! storage.
//!
//! One long-lived task owns the result-queue subscription and processes one
//! message at a time. Every delivery resolves to a classified outcome
//! before it is acknowledged:
//!
//! - **Completed**: the job's `Pending` to `Completed` transition succeeded
//!   and the artifact row was inserted
//! - **Duplicate**: the conditional transition updated nothing (redelivered
//!   message, or a job that never existed). Acked and logged, nothing
//!   inserted.
//! - **DeadLettered**: the payload can never be decoded, so it is disposed
//!   of on the dead-letter queue instead of being redelivered forever
//! - **ConsistencyFailure**: the job was marked completed but the artifact
//!   insert failed. Surfaced at error level for operator attention, not
//!   auto-corrected.
//!
//! Store failures *before* the completion transition leave the delivery
//! unacknowledged, so a crash or outage results in redelivery; the
//! conditional transition absorbs whatever was already applied.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::channel::{ChannelError, Delivery, MessageChannel};
use crate::message::ResultMessage;
use crate::store::{JobId, JobStore, NewResult, ResultStore, StoreError};

/// Errors that abort processing of a single delivery without classifying
/// it. The delivery stays in flight and is redelivered after recovery.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The job store was unreachable or failed.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// A channel operation (ack, dead-letter, receive) failed.
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Classified outcome of one consumed result message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Job transitioned to `Completed` and its result was stored.
    Completed(JobId),
    /// Benign duplicate: job missing or already completed. Nothing stored.
    Duplicate(JobId),
    /// Payload was malformed and moved to the dead-letter queue.
    DeadLettered,
    /// Job marked completed but the result insert failed. Acked; needs
    /// compensating reconciliation by an operator.
    ConsistencyFailure(JobId),
}

/// Configuration for the result listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Queue the worker publishes results to.
    pub result_queue: String,
    /// How long each receive blocks before re-checking for shutdown.
    pub poll_interval: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            result_queue: "analysis.results".to_string(),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl ListenerConfig {
    /// Creates a configuration for the named result queue.
    pub fn new(result_queue: impl Into<String>) -> Self {
        Self {
            result_queue: result_queue.into(),
            ..Default::default()
        }
    }

    /// Sets the receive poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Background task consuming the result queue.
pub struct ResultListener {
    channel: Arc<dyn MessageChannel>,
    jobs: Arc<dyn JobStore>,
    results: Arc<dyn ResultStore>,
    config: ListenerConfig,
}

impl ResultListener {
    /// Creates a listener over the given channel and stores.
    pub fn new(
        channel: Arc<dyn MessageChannel>,
        jobs: Arc<dyn JobStore>,
        results: Arc<dyn ResultStore>,
        config: ListenerConfig,
    ) -> Self {
        Self {
            channel,
            jobs,
            results,
            config,
        }
    }

    /// Runs the subscription loop until a shutdown signal arrives.
    ///
    /// On startup, deliveries stranded in flight by a previous crash are
    /// recovered onto the ready queue. The loop processes one message at a
    /// time and checks for shutdown between messages; an in-flight message
    /// finishes processing before the loop exits.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ChannelError> {
        let queue = self.config.result_queue.clone();

        let recovered = self.channel.recover(&queue).await?;
        if recovered > 0 {
            info!(
                recovered = recovered,
                queue = %queue,
                "Recovered stranded result deliveries"
            );
        }

        info!(queue = %queue, "Result listener started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(queue = %queue, "Result listener shutting down");
                    break;
                }
                received = self.channel.receive(&queue, self.config.poll_interval) => {
                    match received {
                        Ok(Some(delivery)) => {
                            if let Err(e) = self.process(&delivery).await {
                                // Left unacked: redelivered after recovery,
                                // absorbed by the completion guard.
                                error!(
                                    error = %e,
                                    "Result processing failed; delivery left in flight"
                                );
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, "Receive failed; retrying");
                            tokio::time::sleep(self.config.poll_interval).await;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Processes one delivery to a classified outcome.
    ///
    /// The delivery is acknowledged (or dead-lettered) exactly when the
    /// returned value is `Ok`; an `Err` leaves it in flight.
    pub async fn process(&self, delivery: &Delivery) -> Result<Outcome, ListenerError> {
        let message = match ResultMessage::from_bytes(&delivery.payload) {
            Ok(m) => m,
            Err(e) => {
                error!(error = %e, "Malformed result payload; dead-lettering");
                self.channel
                    .dead_letter(delivery, &format!("malformed payload: {}", e))
                    .await?;
                return Ok(Outcome::DeadLettered);
            }
        };

        let artifact = match message.artifact_bytes() {
            Ok(a) => a,
            Err(e) => {
                error!(
                    job_id = message.job_id,
                    error = %e,
                    "Result artifact is not valid base64; dead-lettering"
                );
                self.channel
                    .dead_letter(delivery, &format!("invalid artifact encoding: {}", e))
                    .await?;
                return Ok(Outcome::DeadLettered);
            }
        };

        // Compare-and-set in the store; duplicate and out-of-order
        // deliveries fall through here.
        if !self.jobs.mark_completed(message.job_id).await? {
            info!(
                job_id = message.job_id,
                "Result for unknown or already-completed job; acknowledging as duplicate"
            );
            self.channel.ack(delivery).await?;
            return Ok(Outcome::Duplicate(message.job_id));
        }

        let outcome = match self
            .results
            .insert_result(NewResult {
                job_id: message.job_id,
                artifact,
                completed_at: message.completed_at,
            })
            .await
        {
            Ok(()) => {
                info!(
                    job_id = message.job_id,
                    worker_message = message.message.as_deref().unwrap_or_default(),
                    "Job completed and result stored"
                );
                Outcome::Completed(message.job_id)
            }
            Err(e) => {
                // The completion transition already happened; redelivery
                // cannot repair this, so surface it instead of retrying.
                error!(
                    job_id = message.job_id,
                    error = %e,
                    "Job marked completed but result insert failed; manual reconciliation required"
                );
                Outcome::ConsistencyFailure(message.job_id)
            }
        };

        self.channel.ack(delivery).await?;
        Ok(outcome)
    }
}
