use auth_zanzibar::{ErrorCategory, ZanzibarError};
use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

/// JSON body returned for every failed request
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Correlates the response with the server log line
    pub error_id: String,
    /// Stable machine-readable kind, e.g. `validation_error`
    pub error_type: String,
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Failure of an HTTP request, one variant per response status
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Authentication error: {message}")]
    Authentication { message: String },

    #[error("Authorization error: {message}")]
    Authorization { message: String },

    #[error("Resource not found: {message}")]
    NotFound { message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Authentication { .. } => StatusCode::UNAUTHORIZED,
            ApiError::Authorization { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "validation_error",
            ApiError::Authentication { .. } => "authentication_error",
            ApiError::Authorization { .. } => "authorization_error",
            ApiError::NotFound { .. } => "not_found",
            ApiError::Internal { .. } => "internal_error",
        }
    }
}

impl From<ZanzibarError> for ApiError {
    fn from(err: ZanzibarError) -> Self {
        let message = err.to_string();
        match err.category() {
            ErrorCategory::Validation => ApiError::Validation { message },
            ErrorCategory::NotFound => ApiError::NotFound { message },
            ErrorCategory::Forbidden => ApiError::Authorization { message },
            ErrorCategory::Internal => ApiError::Internal { message },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_id = Uuid::new_v4().to_string();
        let status_code = self.status_code();

        let message = match &self {
            ApiError::Internal { .. } => {
                error!(
                    error_id = %error_id,
                    error = %self,
                    "Internal error while handling request"
                );
                "An internal error occurred".to_string()
            }
            _ => {
                warn!(
                    error_id = %error_id,
                    error_type = %self.error_type(),
                    status_code = %status_code.as_u16(),
                    error = %self,
                    "Request rejected"
                );
                self.to_string()
            }
        };

        let error_response = ApiErrorResponse {
            error_id,
            error_type: self.error_type().to_string(),
            message,
            timestamp: chrono::Utc::now(),
        };

        (status_code, Json(error_response)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_errors_map_to_statuses() {
        let cases = [
            (ZanzibarError::InvalidObject("doc".into()), StatusCode::BAD_REQUEST),
            (ZanzibarError::NamespaceNotFound("doc".into()), StatusCode::NOT_FOUND),
            (ZanzibarError::Forbidden("no".into()), StatusCode::FORBIDDEN),
            (ZanzibarError::StorageError("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (ZanzibarError::DeadlineExceeded, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
        assert_eq!(
            ApiError::authentication("missing").status_code(),
            StatusCode::UNAUTHORIZED
        );
    }
}
