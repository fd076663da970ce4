//! Submission service: accepts a dataset and hands it to the worker queue.
//!
//! The submission path is strictly ordered: validate, insert the job as
//! `Pending`, then publish the work message. The insert must happen before
//! the publish because the message body embeds the assigned job id.
//!
//! A publish failure after a successful insert leaves an orphaned `Pending`
//! job that no worker will ever see. The condition is logged with the job
//! id and the error is propagated; there is no automatic re-publish sweep.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::channel::{ChannelError, MessageChannel};
use crate::message::WorkMessage;
use crate::store::{JobId, JobStore, StoreError};

/// Errors that can occur during submission.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The dataset payload was empty or missing.
    #[error("Dataset payload is empty")]
    EmptyDataset,

    /// The owning user identifier was empty.
    #[error("Owner identifier is empty")]
    EmptyOwner,

    /// Persisting the job failed.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Publishing the work message failed.
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The work message could not be serialized.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Accepts new analysis requests and enqueues them for the external worker.
pub struct SubmissionService {
    jobs: Arc<dyn JobStore>,
    channel: Arc<dyn MessageChannel>,
    work_queue: String,
}

impl SubmissionService {
    /// Creates a submission service publishing to the named work queue.
    pub fn new(
        jobs: Arc<dyn JobStore>,
        channel: Arc<dyn MessageChannel>,
        work_queue: impl Into<String>,
    ) -> Self {
        Self {
            jobs,
            channel,
            work_queue: work_queue.into(),
        }
    }

    /// Submits a dataset for analysis.
    ///
    /// On success exactly one `Pending` job exists and exactly one work
    /// message referencing it has been published.
    ///
    /// # Errors
    ///
    /// Validation failures occur before any persistence or publish, so a
    /// rejected submission has no side effects. A `Channel` error after the
    /// insert means the job row exists but no worker was notified.
    pub async fn submit(
        &self,
        owner_id: &str,
        file_name: &str,
        dataset: &[u8],
    ) -> Result<JobId, SubmitError> {
        if dataset.is_empty() {
            return Err(SubmitError::EmptyDataset);
        }
        if owner_id.is_empty() {
            return Err(SubmitError::EmptyOwner);
        }

        // The insert must complete first: the assigned id goes inside the
        // message body.
        let job_id = self.jobs.insert_pending(owner_id, Utc::now()).await?;

        let message = WorkMessage::new(job_id, owner_id, file_name, dataset);
        let payload = message.to_bytes()?;

        if let Err(e) = self.channel.publish(&self.work_queue, &payload).await {
            warn!(
                job_id = job_id,
                error = %e,
                "Work message publish failed; job is orphaned in pending state"
            );
            return Err(e.into());
        }

        info!(
            job_id = job_id,
            owner_id = %owner_id,
            file_name = %file_name,
            "Submission accepted and published to work queue"
        );

        Ok(job_id)
    }
}
