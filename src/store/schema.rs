//! Database schema constants.
//!
//! All SQL schema definitions for the PostgreSQL storage backend. The
//! statements are idempotent (IF NOT EXISTS) and applied in order by the
//! migration runner.

/// SQL schema for creating the analysis_jobs table.
///
/// Status is constrained to the closed set the `JobStatus` enum models.
pub const CREATE_ANALYSIS_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS analysis_jobs (
    id BIGSERIAL PRIMARY KEY,
    owner_id VARCHAR(255) NOT NULL,
    status VARCHAR(16) NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'completed')),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// SQL schema for creating the analysis_results table.
///
/// `job_id` is UNIQUE (one result per job) and cascades on job deletion
/// (the job owns its result).
pub const CREATE_ANALYSIS_RESULTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS analysis_results (
    id BIGSERIAL PRIMARY KEY,
    job_id BIGINT NOT NULL UNIQUE REFERENCES analysis_jobs(id) ON DELETE CASCADE,
    artifact BYTEA NOT NULL,
    completed_at TIMESTAMPTZ NOT NULL
)
"#;

/// Index supporting the ownership-filtered status queries.
pub const CREATE_JOBS_OWNER_STATUS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_analysis_jobs_owner_status
    ON analysis_jobs (owner_id, status)
"#;

/// Returns all schema statements in creation order.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_ANALYSIS_JOBS_TABLE,
        CREATE_ANALYSIS_RESULTS_TABLE,
        CREATE_JOBS_OWNER_STATUS_INDEX,
    ]
}
