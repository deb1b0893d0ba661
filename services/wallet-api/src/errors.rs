use crate::models::{ApiResponse, ErrorBody};
use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use wallet_ledger::ErrorKind;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] wallet_ledger::Error),

    #[error("Invalid request body: {0}")]
    InvalidBody(#[from] JsonRejection),

    #[error("Invalid path parameter: {0}")]
    InvalidPath(#[from] PathRejection),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Ledger(e) => match e.kind() {
                ErrorKind::ValidationFailed => StatusCode::BAD_REQUEST,
                ErrorKind::WalletNotFound => StatusCode::NOT_FOUND,
                ErrorKind::InsufficientBalance => StatusCode::BAD_REQUEST,
                ErrorKind::StorageUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::InvalidBody(_) | ApiError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::Ledger(e) => e.kind().as_str(),
            ApiError::InvalidBody(_) | ApiError::InvalidPath(_) => {
                ErrorKind::ValidationFailed.as_str()
            }
            ApiError::Internal(_) => "internal_error",
        }
    }

    /// Client-facing message; infrastructure details stay in the logs
    fn public_message(&self) -> String {
        if self.status_code().is_server_error() {
            "internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = ApiResponse::<()>::failure(ErrorBody {
            code: status.as_u16(),
            message: self.public_message(),
            error_type: self.error_type().to_string(),
        });

        (status, Json(body)).into_response()
    }
}
