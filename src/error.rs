//! Gateway error taxonomy.
//!
//! Every failure surfaced to a client is one of these variants and is
//! rendered through [`crate::http::response::ErrorEnvelope`].

use std::collections::BTreeMap;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Client exhausted its token bucket.
    #[error("rate limit exceeded for client {client}")]
    RateLimitExceeded { client: String, retry_after: Duration },

    /// Circuit breaker for the target is open; no call was attempted.
    #[error("upstream '{target}' is unavailable (circuit open)")]
    UpstreamUnavailable { target: String },

    /// Attempt or whole-request deadline elapsed.
    #[error("upstream '{target}' timed out after {}ms", .elapsed.as_millis())]
    UpstreamTimeout { target: String, elapsed: Duration },

    /// Could not reach the upstream at the connection level.
    #[error("could not reach upstream '{target}': {reason}")]
    UpstreamConnect { target: String, reason: String },

    /// Upstream answered with a non-success status.
    #[error("upstream '{target}' responded with {status}")]
    UpstreamError {
        target: String,
        status: StatusCode,
        body: Bytes,
    },

    /// No route matched the inbound request.
    #[error("no route for {path}")]
    NoRoute { path: String },

    #[error("validation failed")]
    ValidationFailed { field_errors: BTreeMap<String, String> },

    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    /// Status code this error is surfaced with.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamConnect { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamError { status, .. } => *status,
            GatewayError::NoRoute { .. } => StatusCode::NOT_FOUND,
            GatewayError::ValidationFailed { .. } => StatusCode::BAD_REQUEST,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Single-field validation failure.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut field_errors = BTreeMap::new();
        field_errors.insert(field.into(), message.into());
        GatewayError::ValidationFailed { field_errors }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
