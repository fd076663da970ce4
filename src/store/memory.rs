//! In-memory storage backend for tests and local development.
//!
//! Implements the same contracts as the PostgreSQL backend, including the
//! conditional completion transition and the one-result-per-job constraint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    AnalysisResult, CompletedJob, Job, JobId, JobStatus, JobStore, NewResult, ResultStore,
    StoreError,
};

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    results: HashMap<JobId, AnalysisResult>,
}

/// In-memory store implementing both the job and result contracts.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    next_job_id: AtomicI64,
    next_result_id: AtomicI64,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().expect("store lock poisoned");
        f(&mut state)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_pending(
        &self,
        owner_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<JobId, StoreError> {
        let id = self.next_job_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.with_state(|s| {
            s.jobs.insert(
                id,
                Job {
                    id,
                    owner_id: owner_id.to_string(),
                    status: JobStatus::Pending,
                    created_at,
                },
            );
        });
        Ok(id)
    }

    async fn mark_completed(&self, job_id: JobId) -> Result<bool, StoreError> {
        Ok(self.with_state(|s| match s.jobs.get_mut(&job_id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Completed;
                true
            }
            _ => false,
        }))
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.with_state(|s| s.jobs.get(&job_id).cloned()))
    }

    async fn pending_by_owner(&self, owner_id: &str) -> Result<Vec<Job>, StoreError> {
        let mut jobs = self.with_state(|s| {
            s.jobs
                .values()
                .filter(|j| j.owner_id == owner_id && j.status == JobStatus::Pending)
                .cloned()
                .collect::<Vec<_>>()
        });
        jobs.sort_by_key(|j| (j.created_at, j.id));
        Ok(jobs)
    }

    async fn completed_by_owner(&self, owner_id: &str) -> Result<Vec<CompletedJob>, StoreError> {
        let mut completed = self.with_state(|s| {
            s.jobs
                .values()
                .filter(|j| j.owner_id == owner_id && j.status == JobStatus::Completed)
                .filter_map(|j| {
                    s.results.get(&j.id).map(|r| CompletedJob {
                        job: j.clone(),
                        result: r.clone(),
                    })
                })
                .collect::<Vec<_>>()
        });
        completed.sort_by_key(|c| (c.job.created_at, c.job.id));
        Ok(completed)
    }

    async fn delete(&self, job_id: JobId) -> Result<(), StoreError> {
        self.with_state(|s| {
            if s.jobs.remove(&job_id).is_none() {
                return Err(StoreError::NotFound(format!("Job {}", job_id)));
            }
            // Cascade, mirroring the foreign key in the SQL schema.
            s.results.remove(&job_id);
            Ok(())
        })
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn insert_result(&self, result: NewResult) -> Result<(), StoreError> {
        let id = self.next_result_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.with_state(|s| {
            if s.results.contains_key(&result.job_id) {
                return Err(StoreError::DuplicateResult(result.job_id));
            }
            s.results.insert(
                result.job_id,
                AnalysisResult {
                    id,
                    job_id: result.job_id,
                    artifact: result.artifact,
                    completed_at: result.completed_at,
                },
            );
            Ok(())
        })
    }

    async fn result_for_job(&self, job_id: JobId) -> Result<Option<AnalysisResult>, StoreError> {
        Ok(self.with_state(|s| s.results.get(&job_id).cloned()))
    }
}
