//! API handlers module

pub mod health;
pub mod records;
pub mod reports;

use axum::response::{IntoResponse, Response};
use reportforge_common::{errors::AppError, generation::GenerationError};

/// Handler error: caller mistakes keep their own status, generation
/// failures go through the four-kind mapping
#[derive(Debug)]
pub enum ApiError {
    App(AppError),
    Generation(GenerationError),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError::App(err)
    }
}

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Unexpected(source) if source.status_code().is_client_error() => {
                ApiError::App(source)
            }
            other => ApiError::Generation(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::App(err) => err.into_response(),
            ApiError::Generation(err) => err.into_response(),
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
