//! Typed error hierarchy for the review orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `StoreError` — job store persistence failures
//! - `OrchestratorError` — stage execution and orchestration failures
//! - `ApiError` — HTTP/WS boundary failures, mapped to response status codes

use thiserror::Error;

/// Errors from the job store subsystem.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {job_id} not found")]
    JobNotFound { job_id: i64 },

    #[error("failed to open database at {path}: {source}")]
    OpenFailed {
        path: std::path::PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database query failed: {0}")]
    Query(#[source] rusqlite::Error),

    #[error("failed to (de)serialize metadata: {0}")]
    Metadata(#[source] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Query(e)
    }
}

/// Errors from a single stage or job orchestration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("LLM call failed for stage {stage}: {message}")]
    LlmFailed { stage: String, message: String },

    #[error("job store failure during orchestration: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the HTTP/WS boundary, mapped to response status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("job {id} not found")]
    NotFound { id: i64 },

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::JobNotFound { job_id } => ApiError::NotFound { id: job_id },
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_job_not_found_carries_id() {
        let err = StoreError::JobNotFound { job_id: 42 };
        match &err {
            StoreError::JobNotFound { job_id } => assert_eq!(*job_id, 42),
            _ => panic!("expected JobNotFound"),
        }
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn orchestrator_error_converts_from_store_error() {
        let inner = StoreError::JobNotFound { job_id: 7 };
        let orch_err: OrchestratorError = inner.into();
        match &orch_err {
            OrchestratorError::Store(StoreError::JobNotFound { job_id }) => assert_eq!(*job_id, 7),
            _ => panic!("expected Store(JobNotFound)"),
        }
    }

    #[test]
    fn api_error_maps_not_found_from_store_error() {
        let store_err = StoreError::JobNotFound { job_id: 3 };
        let api_err: ApiError = store_err.into();
        assert!(matches!(api_err, ApiError::NotFound { id: 3 }));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&StoreError::JobNotFound { job_id: 1 });
        assert_std_error(&OrchestratorError::Store(StoreError::JobNotFound { job_id: 1 }));
        assert_std_error(&ApiError::BadRequest("x".into()));
    }
}
