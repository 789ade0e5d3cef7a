use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use classifier_structs::ClassifierError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Error returned by HTTP handlers, rendered as `{"detail": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// A required form field was missing or malformed.
    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(%status, detail = %self, "Request failed");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<ClassifierError> for ApiError {
    fn from(error: ClassifierError) -> Self {
        match error {
            ClassifierError::InvalidClassName(_) => Self::BadRequest("Invalid class name".to_string()),
            ClassifierError::InvalidFileType(_) => Self::BadRequest("File must be an image.".to_string()),
            ClassifierError::InvalidImage(_) => Self::BadRequest(error.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(error: MultipartError) -> Self {
        Self::BadRequest(format!("Invalid multipart body: {}", error.body_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_map_to_status_codes() {
        let cases = [
            (ClassifierError::InvalidClassName("..".into()), StatusCode::BAD_REQUEST),
            (ClassifierError::InvalidFileType("text/plain".into()), StatusCode::BAD_REQUEST),
            (ClassifierError::InvalidImage("bad".into()), StatusCode::BAD_REQUEST),
            (ClassifierError::ModelUnavailable, StatusCode::INTERNAL_SERVER_ERROR),
            (ClassifierError::TrainingFailure("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status_code(), expected);
        }
    }

    #[test]
    fn test_invalid_class_name_detail() {
        let error = ApiError::from(ClassifierError::InvalidClassName("../".into()));
        assert_eq!(error.to_string(), "Invalid class name");
    }
}
