//! API error types

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use courier_delivery::DispatchError;
use serde_json::json;
use thiserror::Error;

/// Errors that stop the server itself.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address
    #[error("Failed to bind API server to {address}: {source}")]
    BindError {
        address: String,
        source: std::io::Error,
    },

    #[error("API server error: {0}")]
    Runtime(String),
}

/// Request-level failures, rendered as `{"error": "..."}` bodies.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Malformed request body: {0}")]
    MalformedBody(String),

    #[error("Invalid delivery id '{0}'")]
    InvalidId(String),

    #[error("Unknown status filter '{0}'")]
    InvalidFilter(String),
}

impl ApiError {
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Dispatch(DispatchError::Validation(_))
            | Self::MalformedBody(_)
            | Self::InvalidId(_)
            | Self::InvalidFilter(_) => StatusCode::BAD_REQUEST,
            Self::Dispatch(DispatchError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Dispatch(DispatchError::NotCancellable { .. }) => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_client_error() {
            tracing::debug!(status = status.as_u16(), error = %self, "Request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
