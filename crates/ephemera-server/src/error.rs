use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use ephemera_shared::protocol::ErrorBody;
use ephemera_shared::TypeError;

use crate::redact::scrub_addresses;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Missing, malformed, or oversized input. Never retried server-side.
    #[error("{0}")]
    Validation(String),

    /// Caller is over quota. The message is generic and per limiter.
    #[error("{0}")]
    RateLimited(&'static str),

    /// Unexpected fault. The detail is logged, never returned.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<TypeError> for RelayError {
    fn from(e: TypeError) -> Self {
        RelayError::Validation(e.to_string())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            RelayError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            RelayError::RateLimited(msg) => (StatusCode::TOO_MANY_REQUESTS, msg.to_string()),
            RelayError::Internal(detail) => {
                tracing::error!(detail = %scrub_addresses(detail), "Internal fault");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = ErrorBody {
            success: false,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}
