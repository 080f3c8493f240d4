//! The error taxonomy for the adapter. Every fallible operation in this crate resolves to one
//! of these kinds; the API layer (`server`) maps each kind to a status code and a short,
//! sanitized JSON body. Internal detail (transport error chains, raw HTML) is logged via
//! `tracing`, never serialized back to the caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors produced while bootstrapping a session, fetching from the upstream, scraping its
/// HTML, or validating the assembled model.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Missing or malformed caller input: no cookie header, no `student_id`, a negative
    /// `count`, or a cookie string with no parseable pairs.
    #[error("bad request: {0}")]
    InputError(String),

    /// The upstream bounced the bootstrap request back to a login page, or the session was
    /// lost mid-request.
    #[error("authentication failed: {0}")]
    AuthError(String),

    /// A required token or anchor that the upstream is expected to always provide was absent
    /// (e.g. `lname`, the `time_8_16` table).
    #[error("upstream protocol violation: {0}")]
    UpstreamProtocolError(String),

    /// The upstream returned a non-retryable HTTP failure.
    #[error("upstream returned status {status}: {body_snippet}")]
    UpstreamStatusError { status: u16, body_snippet: String },

    /// Every retry attempt failed at the transport level (timeout / connection error).
    #[error("network error after retries: {0}")]
    NetworkError(String),

    /// The assembled `TimetableData` failed schema validation.
    #[error("validation failed: {0}")]
    ValidationError(String),

    /// Anything else.
    #[error("internal error: {0}")]
    InternalError(String),
}

impl AdapterError {
    /// The short machine-readable category used in the JSON error body and in logs.
    pub fn category(&self) -> &'static str {
        match self {
            AdapterError::InputError(_) => "bad_request",
            AdapterError::AuthError(_) => "auth_error",
            AdapterError::UpstreamProtocolError(_) => "upstream_error",
            AdapterError::UpstreamStatusError { .. } => "upstream_error",
            AdapterError::NetworkError(_) => "network_error",
            AdapterError::ValidationError(_) => "validation_error",
            AdapterError::InternalError(_) => "internal_error",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AdapterError::InputError(_) => StatusCode::BAD_REQUEST,
            AdapterError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AdapterError::UpstreamProtocolError(_) => StatusCode::BAD_GATEWAY,
            AdapterError::UpstreamStatusError { .. } => StatusCode::BAD_GATEWAY,
            AdapterError::NetworkError(_) => StatusCode::GATEWAY_TIMEOUT,
            AdapterError::ValidationError(_) => StatusCode::NOT_FOUND,
            AdapterError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AdapterError {
    fn into_response(self) -> Response {
        tracing::warn!(category = self.category(), error = %self, "request failed");
        let body = json!({
            "category": self.category(),
            "message": self.to_string(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;
