use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use dataset_profiler_core::errors::PipelineError;
use serde_json::json;

/// API-boundary errors. The `ResponseError` impl renders every variant as a
/// JSON body of the shape `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    UnsupportedMediaType(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.to_string()
        }))
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NotFound => ApiError::NotFound("Resource not found".to_string()),
            PipelineError::InvalidRequest(msg) => ApiError::Validation(msg),
            PipelineError::StorageBackend(_) => {
                ApiError::ServiceUnavailable("Metadata store unavailable".to_string())
            }
            PipelineError::ObjectStore(_) => {
                ApiError::ServiceUnavailable("Object store unavailable".to_string())
            }
            PipelineError::QueueUnavailable(_) => {
                ApiError::ServiceUnavailable("Queue unavailable".to_string())
            }
            other => ApiError::Internal(format!("Unexpected error: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::Validation("bad".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::UnsupportedMediaType("nope".into()).status_code(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            ApiError::NotFound("gone".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::ServiceUnavailable("down".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_infra_kinds_map_to_503() {
        for err in [
            PipelineError::StorageBackend(anyhow::anyhow!("down")),
            PipelineError::ObjectStore(anyhow::anyhow!("down")),
            PipelineError::QueueUnavailable(anyhow::anyhow!("down")),
        ] {
            let api_err = ApiError::from(err);
            assert_eq!(api_err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        }
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let api_err = ApiError::from(PipelineError::NotFound);
        assert_eq!(api_err.status_code(), StatusCode::NOT_FOUND);
    }
}
