//! Caller-facing generation errors
//!
//! Every failure inside a generation cycle is reduced to one of four
//! kinds. Internal detail is kept for logs; callers only ever see
//! [`GenerationError::user_message`].

use crate::errors::{AppError, ErrorCode, ErrorDetails, ErrorResponse};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("insufficient data for '{kind}': missing {}", .missing.join(", "))]
    InsufficientData { kind: String, missing: Vec<String> },

    #[error("generation timed out after {attempts} attempt(s) of {timeout_secs}s")]
    GenerationTimeout { timeout_secs: u64, attempts: u32 },

    #[error("model output unusable: {message}")]
    ParseError { message: String },

    #[error("unexpected failure: {0}")]
    Unexpected(#[source] AppError),
}

impl From<AppError> for GenerationError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::InsufficientData { kind, missing } => {
                GenerationError::InsufficientData { kind, missing }
            }
            AppError::GenerationTimeout {
                timeout_secs,
                attempts,
            } => GenerationError::GenerationTimeout {
                timeout_secs,
                attempts,
            },
            AppError::ParseError { message } => GenerationError::ParseError { message },
            other => GenerationError::Unexpected(other),
        }
    }
}

impl GenerationError {
    /// Short label for metrics and logs
    pub fn kind_name(&self) -> &'static str {
        match self {
            GenerationError::InsufficientData { .. } => "insufficient_data",
            GenerationError::GenerationTimeout { .. } => "timeout",
            GenerationError::ParseError { .. } => "parse_error",
            GenerationError::Unexpected(_) => "unexpected",
        }
    }

    /// Text safe to show an end user
    pub fn user_message(&self) -> &'static str {
        match self {
            GenerationError::InsufficientData { .. } => {
                "Please complete the required questionnaires before generating this report."
            }
            _ => "We could not generate this report right now. Please try again.",
        }
    }

    /// What the caller should offer next
    pub fn action(&self) -> &'static str {
        match self {
            GenerationError::InsufficientData { .. } => "complete_inputs",
            _ => "retry",
        }
    }

    /// Only missing input is the caller's to fix
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GenerationError::InsufficientData { .. })
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            GenerationError::InsufficientData { .. } => ErrorCode::InsufficientData,
            GenerationError::GenerationTimeout { .. } => ErrorCode::GenerationTimeout,
            GenerationError::ParseError { .. } => ErrorCode::ParseError,
            GenerationError::Unexpected(_) => ErrorCode::InternalError,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GenerationError::InsufficientData { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            GenerationError::GenerationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GenerationError::ParseError { .. } => StatusCode::BAD_GATEWAY,
            GenerationError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GenerationError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            GenerationError::Unexpected(source) => {
                tracing::error!(error = %source, code = ?source.code(), "Generation failed");
            }
            other => {
                tracing::warn!(error = %other, kind = other.kind_name(), "Generation failed");
            }
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code: self.code(),
                message: self.user_message().to_string(),
                action: Some(self.action().to_string()),
                request_id: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let insufficient: GenerationError = AppError::InsufficientData {
            kind: "work_style".into(),
            missing: vec!["work_style".into()],
        }
        .into();
        assert!(matches!(insufficient, GenerationError::InsufficientData { .. }));
        assert!(!insufficient.is_retryable());

        let timeout: GenerationError = AppError::GenerationTimeout {
            timeout_secs: 600,
            attempts: 2,
        }
        .into();
        assert_eq!(timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);

        let parse: GenerationError = AppError::ParseError {
            message: "no object".into(),
        }
        .into();
        assert_eq!(parse.status_code(), StatusCode::BAD_GATEWAY);

        let other: GenerationError = AppError::QueueError {
            message: "sqs down".into(),
        }
        .into();
        assert!(matches!(other, GenerationError::Unexpected(_)));
        assert_eq!(other.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_user_message_hides_detail() {
        let err = GenerationError::Unexpected(AppError::Internal {
            message: "connection refused at 10.0.0.3:5432".into(),
        });
        assert!(!err.user_message().contains("10.0.0.3"));
        assert_eq!(err.action(), "retry");

        let missing = GenerationError::InsufficientData {
            kind: "k".into(),
            missing: vec!["task_analysis".into()],
        };
        assert_eq!(missing.action(), "complete_inputs");
        assert!(missing.to_string().contains("task_analysis"));
    }

    #[tokio::test]
    async fn test_response_uses_user_message() {
        let response = GenerationError::ParseError {
            message: "secret model output".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
