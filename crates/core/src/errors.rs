//! Error kinds shared by the ingest service and the processing worker.
//!
//! Classification is what matters here: the worker only retries the three
//! infrastructure kinds; everything else finalizes the job as a failure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("resource not found")]
    NotFound,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Payload-level failure during processing (malformed CSV, non-array
    /// JSON, bad encoding, over-cap input). Never retried.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("metadata store unavailable: {0}")]
    StorageBackend(#[source] anyhow::Error),

    #[error("object store unavailable: {0}")]
    ObjectStore(#[source] anyhow::Error),

    #[error("queue unavailable: {0}")]
    QueueUnavailable(#[source] anyhow::Error),

    /// A CAS state transition matched zero rows.
    #[error("conflicting state transition")]
    Conflict,

    #[error("unexpected error: {0}")]
    Unexpected(#[source] anyhow::Error),
}

impl PipelineError {
    /// Whether the worker's retry policy applies to this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::StorageBackend(_)
                | PipelineError::ObjectStore(_)
                | PipelineError::QueueUnavailable(_)
        )
    }

    /// Short stable label used in metrics and failure logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::NotFound => "not_found",
            PipelineError::InvalidRequest(_) => "invalid_request",
            PipelineError::InvalidPayload(_) => "invalid_payload",
            PipelineError::StorageBackend(_) => "storage_backend",
            PipelineError::ObjectStore(_) => "object_store",
            PipelineError::QueueUnavailable(_) => "queue_unavailable",
            PipelineError::Conflict => "conflict",
            PipelineError::Unexpected(_) => "unexpected",
        }
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => PipelineError::NotFound,
            other => PipelineError::StorageBackend(other.into()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for PipelineError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        PipelineError::StorageBackend(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_infra_kinds_are_transient() {
        assert!(PipelineError::StorageBackend(anyhow::anyhow!("down")).is_transient());
        assert!(PipelineError::ObjectStore(anyhow::anyhow!("down")).is_transient());
        assert!(PipelineError::QueueUnavailable(anyhow::anyhow!("down")).is_transient());

        assert!(!PipelineError::NotFound.is_transient());
        assert!(!PipelineError::InvalidPayload("bad csv".to_string()).is_transient());
        assert!(!PipelineError::Conflict.is_transient());
        assert!(!PipelineError::Unexpected(anyhow::anyhow!("bug")).is_transient());
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err = PipelineError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, PipelineError::NotFound));
    }
}
