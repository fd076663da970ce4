//! Persistent storage for analysis jobs and their results.
//!
//! The job store owns the canonical lifecycle of a submitted job
//! (`Pending` → `Completed`); the result store owns the artifact the
//! external worker produced, linked one-to-one with its completed job.
//!
//! Two implementations are provided behind the `JobStore`/`ResultStore`
//! traits: `Database` (PostgreSQL, production) and `MemoryStore` (tests and
//! local development). The transition to `Completed` is a conditional
//! update in both, so duplicate result deliveries are absorbed without
//! in-process locking.

mod memory;
mod migrations;
mod postgres;
mod schema;

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryStore;
pub use migrations::{MigrationError, MigrationRunner};
pub use postgres::Database;

/// Identity of a submitted job. Assigned by the store, never reused.
pub type JobId = i64;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection to the store failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// A result already exists for the given job.
    #[error("Result already exists for job {0}")]
    DuplicateResult(JobId),

    /// Record not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A persisted status value is outside the closed status set.
    #[error("Invalid job status '{0}' in store")]
    InvalidStatus(String),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}

/// Lifecycle state of a job.
///
/// `Completed` is terminal; no transition leads back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Submitted and published, awaiting the worker's result.
    Pending,
    /// Result consumed and reconciled.
    Completed,
}

impl JobStatus {
    /// Stored string form of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Completed => "completed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = StoreError;

    /// Parses a stored status value, rejecting anything outside the closed
    /// set.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "completed" => Ok(JobStatus::Completed),
            other => Err(StoreError::InvalidStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One user-submitted analysis request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Store-assigned identity.
    pub id: JobId,
    /// User who submitted the job.
    pub owner_id: String,
    /// Lifecycle state.
    pub status: JobStatus,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
}

/// Artifact produced by the external worker for one completed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Store-assigned identity of the result row.
    pub id: i64,
    /// Job this result belongs to (unique per job).
    pub job_id: JobId,
    /// Opaque artifact payload.
    pub artifact: Vec<u8>,
    /// When the worker finished processing.
    pub completed_at: DateTime<Utc>,
}

/// A result ready to be inserted, before the store assigns its identity.
#[derive(Debug, Clone)]
pub struct NewResult {
    /// Job this result belongs to.
    pub job_id: JobId,
    /// Opaque artifact payload.
    pub artifact: Vec<u8>,
    /// When the worker finished processing.
    pub completed_at: DateTime<Utc>,
}

/// A completed job together with its stored result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedJob {
    /// The job record (status is always `Completed`).
    pub job: Job,
    /// The artifact the worker produced for it.
    pub result: AnalysisResult,
}

/// Canonical record of submitted jobs and their lifecycle state.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Creates a job in `Pending` state and returns its identity.
    ///
    /// Atomic; the returned id is immediately usable inside the work
    /// message.
    async fn insert_pending(
        &self,
        owner_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<JobId, StoreError>;

    /// Transitions a job from `Pending` to `Completed`.
    ///
    /// Returns `false` (a no-op, not an error) if the job does not exist or
    /// is already completed. This is the idempotency guard that makes
    /// duplicate result deliveries safe.
    async fn mark_completed(&self, job_id: JobId) -> Result<bool, StoreError>;

    /// Fetches a single job by id.
    async fn get(&self, job_id: JobId) -> Result<Option<Job>, StoreError>;

    /// Jobs in `Pending` state owned by the given user.
    async fn pending_by_owner(&self, owner_id: &str) -> Result<Vec<Job>, StoreError>;

    /// Completed jobs owned by the given user, each with its result.
    async fn completed_by_owner(&self, owner_id: &str) -> Result<Vec<CompletedJob>, StoreError>;

    /// Deletes a job and, by cascade, its result. Administrative operation;
    /// the pipeline itself never deletes jobs.
    async fn delete(&self, job_id: JobId) -> Result<(), StoreError>;
}

/// Persistent record of worker-produced artifacts.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Inserts a result for a job.
    ///
    /// Fails with `StoreError::DuplicateResult` if a result already exists
    /// for the job, enforcing the one-to-one invariant.
    async fn insert_result(&self, result: NewResult) -> Result<(), StoreError>;

    /// Fetches the result stored for a job, if any.
    async fn result_for_job(&self, job_id: JobId) -> Result<Option<AnalysisResult>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_roundtrip() {
        assert_eq!(JobStatus::Pending.as_str(), "pending");
        assert_eq!(JobStatus::Completed.as_str(), "completed");
        assert_eq!("pending".parse::<JobStatus>().unwrap(), JobStatus::Pending);
        assert_eq!(
            "completed".parse::<JobStatus>().unwrap(),
            JobStatus::Completed
        );
    }

    #[test]
    fn test_status_outside_closed_set_is_rejected() {
        let err = "failed".parse::<JobStatus>().expect_err("must be rejected");
        assert!(matches!(err, StoreError::InvalidStatus(s) if s == "failed"));
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::DuplicateResult(42);
        assert!(err.to_string().contains("42"));

        let err = StoreError::ConnectionFailed("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }
}
