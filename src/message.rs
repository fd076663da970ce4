//! Wire messages exchanged with the external analysis worker.
//!
//! Two message types cross the broker boundary:
//!
//! - `WorkMessage`: published to the work queue to request processing of a
//!   submitted dataset
//! - `ResultMessage`: consumed from the result queue when the worker has
//!   produced an artifact
//!
//! Both are JSON with camelCase field names, matching the worker contract.
//! Raw bytes (the dataset and the produced artifact) travel base64-encoded
//! so the payload stays transport-safe JSON text.

use base64::prelude::{Engine, BASE64_STANDARD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::JobId;

/// Errors that can occur while decoding a message payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload is not valid JSON for the expected schema.
    #[error("Malformed message payload: {0}")]
    Json(#[from] serde_json::Error),

    /// An embedded binary field is not valid base64.
    #[error("Invalid base64 in message payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Message published to the work queue to request analysis of a dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkMessage {
    /// Identity of the pending job this request belongs to.
    pub job_id: JobId,
    /// Owner of the job, carried so the worker can attribute its output.
    pub user_id: String,
    /// Original name of the uploaded dataset file.
    pub file_name: String,
    /// Dataset bytes, base64-encoded.
    pub file_data: String,
}

impl WorkMessage {
    /// Builds a work message for a freshly inserted pending job.
    pub fn new(
        job_id: JobId,
        user_id: impl Into<String>,
        file_name: impl Into<String>,
        dataset: &[u8],
    ) -> Self {
        Self {
            job_id,
            user_id: user_id.into(),
            file_name: file_name.into(),
            file_data: BASE64_STANDARD.encode(dataset),
        }
    }

    /// Decodes the embedded dataset back into raw bytes.
    pub fn dataset(&self) -> Result<Vec<u8>, DecodeError> {
        Ok(BASE64_STANDARD.decode(&self.file_data)?)
    }

    /// Serializes the message for publishing.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parses a message from a raw queue payload.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Message consumed from the result queue when the worker finishes a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResultMessage {
    /// Identity of the job the artifact belongs to.
    pub job_id: JobId,
    /// Produced artifact bytes, base64-encoded.
    pub artifact: String,
    /// When the worker finished processing.
    pub completed_at: DateTime<Utc>,
    /// Optional human-readable status line from the worker.
    #[serde(default)]
    pub message: Option<String>,
}

impl ResultMessage {
    /// Builds a result message carrying a raw artifact.
    pub fn new(job_id: JobId, artifact: &[u8], completed_at: DateTime<Utc>) -> Self {
        Self {
            job_id,
            artifact: BASE64_STANDARD.encode(artifact),
            completed_at,
            message: None,
        }
    }

    /// Sets the worker's status line.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Decodes the embedded artifact back into raw bytes.
    pub fn artifact_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        Ok(BASE64_STANDARD.decode(&self.artifact)?)
    }

    /// Serializes the message for publishing.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parses a message from a raw queue payload.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(payload)?)
    }
}
