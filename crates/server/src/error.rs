use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use acfr_core::MappingError;
use acfr_ingest::{FormatError, RuleError};
use acfr_storage::StorageError;

pub type ApiResult<T> = Result<T, ApiError>;

/// API-facing error. Every layer error folds into one of these
/// variants, which fixes its status code and wire shape.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Format(_) | ApiError::Mapping(_) | ApiError::Rule(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Storage(StorageError::InvalidRulePattern { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Storage(StorageError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Storage(StorageError::ForeignLine { .. })
            | ApiError::Storage(StorageError::WrongFund { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Storage(StorageError::Db(_)) | ApiError::Storage(StorageError::Corrupt(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ApiError::Format(_) => "BAD_FILE",
            ApiError::Mapping(_) => "BAD_MAPPING",
            ApiError::Rule(_) => "BAD_RULE",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::Storage(StorageError::InvalidRulePattern { .. }) => "BAD_RULE",
            ApiError::Storage(StorageError::NotFound { .. }) => "NOT_FOUND",
            ApiError::Storage(StorageError::ForeignLine { .. })
            | ApiError::Storage(StorageError::WrongFund { .. }) => "FOREIGN_REFERENCE",
            ApiError::Storage(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal detail stays in the log; the client gets a generic
        // message for 5xx.
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            tracing::debug!(error = %self, "request rejected");
            self.to_string()
        };

        let body = Json(json!({
            "error": { "code": self.error_code(), "message": message }
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(
            ApiError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Mapping(MappingError::MissingBalanceStrategy).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Storage(StorageError::NotFound { entity: "import", id: 1 }).status_code(),
            StatusCode::NOT_FOUND
        );
        let bad_rule = StorageError::InvalidRulePattern {
            pattern: "(".into(),
            source: regex::Regex::new("(").unwrap_err(),
        };
        assert_eq!(ApiError::Storage(bad_rule).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Storage(StorageError::ForeignLine { line_id: 1, import_id: 2 })
                .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::Storage(StorageError::Corrupt("x".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
