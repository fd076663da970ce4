//! aml-pipeline: asynchronous dataset-analysis job pipeline.
//!
//! A submitted dataset becomes a `Pending` job, is handed to an external
//! worker over a durable queue, and the worker's result is later reconciled
//! back into storage: the job flips to `Completed` exactly once and the
//! produced artifact is stored exactly once, no matter how often the result
//! message is delivered.

pub mod channel;
pub mod cli;
pub mod listener;
pub mod message;
pub mod store;
pub mod submit;

// Re-export the types most callers touch
pub use channel::{ChannelError, Delivery, MemoryChannel, MessageChannel, RedisChannel};
pub use listener::{ListenerConfig, Outcome, ResultListener};
pub use message::{DecodeError, ResultMessage, WorkMessage};
pub use store::{
    AnalysisResult, CompletedJob, Database, Job, JobId, JobStatus, JobStore, MemoryStore,
    NewResult, ResultStore, StoreError,
};
pub use submit::{SubmissionService, SubmitError};
