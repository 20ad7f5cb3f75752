//! API error mapping

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::domain::PipelineError;

/// Error surface of the HTTP handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Validation(msg) => ApiError::BadRequest(msg),
            PipelineError::UnknownRecipient(user) => {
                ApiError::NotFound(format!("unknown recipient {user}"))
            }
            PipelineError::NotGroupMember(group) => {
                ApiError::Forbidden(format!("not a member of group {group}"))
            }
            PipelineError::Overloaded => {
                ApiError::Unavailable("message queue saturated, please retry".into())
            }
            PipelineError::Unavailable(msg) => ApiError::Unavailable(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overload_maps_to_503() {
        let err: ApiError = PipelineError::Overloaded.into();
        assert!(matches!(err, ApiError::Unavailable(_)));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_membership_maps_to_403() {
        let err: ApiError = PipelineError::NotGroupMember("g1".into()).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_validation_maps_to_400() {
        let err: ApiError = PipelineError::Validation("empty content".into()).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
