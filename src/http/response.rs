//! Error translation and rendering.
//!
//! # Responsibilities
//! - Build the canonical error body for every surfaced failure
//! - Reuse a downstream error message when the body is already envelope-shaped
//! - Resolve the correlation id for the body (header, request scope, "N/A")
//! - Render panics caught at the outer boundary as 500s

use std::any::Any;
use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;
use crate::observability::correlation::{self, X_CORRELATION_ID};

/// Message used when a downstream error body carries none of its own.
pub const UPSTREAM_FALLBACK_MESSAGE: &str = "Upstream service error";

/// Correlation id placeholder when none can be resolved.
pub const UNKNOWN_CORRELATION_ID: &str = "N/A";

/// Wire shape of every error returned to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub timestamp: DateTime<Utc>,
    pub status: u16,
    pub error: String,
    pub message: String,
    pub path: String,
    pub correlation_id: String,
    pub field_errors: Option<BTreeMap<String, String>>,
}

impl ErrorEnvelope {
    pub fn new(
        status: StatusCode,
        message: impl Into<String>,
        path: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            status: status.as_u16(),
            error: reason_phrase(status).to_owned(),
            message: message.into(),
            path: path.into(),
            correlation_id: correlation_id.into(),
            field_errors: None,
        }
    }

    pub fn with_field_errors(mut self, field_errors: BTreeMap<String, String>) -> Self {
        self.field_errors = Some(field_errors);
        self
    }

    /// Envelope for a gateway-side failure.
    pub fn from_error(err: &GatewayError, path: &str, correlation_id: &str) -> Self {
        let status = err.status();
        match err {
            GatewayError::RateLimitExceeded { retry_after, .. } => Self::new(
                status,
                format!("Too many requests, retry after {}s", retry_after_secs(*retry_after)),
                path,
                correlation_id,
            ),
            GatewayError::UpstreamUnavailable { target } => Self::new(
                status,
                format!("Upstream service '{}' is unavailable", target),
                path,
                correlation_id,
            ),
            GatewayError::UpstreamTimeout { target, elapsed } => Self::new(
                status,
                format!(
                    "Upstream service '{}' did not respond within {}ms",
                    target,
                    elapsed.as_millis()
                ),
                path,
                correlation_id,
            ),
            GatewayError::UpstreamConnect { target, .. } => Self::new(
                status,
                format!("Upstream service '{}' is unreachable", target),
                path,
                correlation_id,
            ),
            GatewayError::UpstreamError { status, body, .. } => {
                translate(*status, body, path, correlation_id)
            }
            GatewayError::NoRoute { path: unmatched } => Self::new(
                status,
                format!("No route matches {}", unmatched),
                path,
                correlation_id,
            ),
            GatewayError::ValidationFailed { field_errors } => {
                Self::new(status, "Validation failed", path, correlation_id)
                    .with_field_errors(field_errors.clone())
            }
            GatewayError::Internal(message) => Self::new(status, message.clone(), path, correlation_id),
        }
    }
}

/// Map a failed downstream response into an envelope.
///
/// `message` and `fieldErrors` are read independently so a malformed field
/// map never costs the message; non-string field values are kept as JSON text.
pub fn translate(status: StatusCode, body: &[u8], path: &str, correlation_id: &str) -> ErrorEnvelope {
    let downstream = serde_json::from_slice::<Value>(body).ok();

    let message = downstream
        .as_ref()
        .and_then(|d| d.get("message"))
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| UPSTREAM_FALLBACK_MESSAGE.to_owned());

    let field_errors = downstream
        .as_ref()
        .and_then(|d| d.get("fieldErrors"))
        .and_then(Value::as_object)
        .map(|fields| {
            fields
                .iter()
                .map(|(field, value)| {
                    let text = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (field.clone(), text)
                })
                .collect::<BTreeMap<_, _>>()
        });

    let envelope = ErrorEnvelope::new(status, message, path, correlation_id);
    match field_errors {
        Some(field_errors) if !field_errors.is_empty() => envelope.with_field_errors(field_errors),
        _ => envelope,
    }
}

/// Correlation id for an error body: inbound header, then request scope, then "N/A".
pub fn resolve_correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(X_CORRELATION_ID)
        .filter(|value| !value.as_bytes().iter().all(u8::is_ascii_whitespace))
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .or_else(|| correlation::current().map(|id| id.to_string()))
        .unwrap_or_else(|| UNKNOWN_CORRELATION_ID.to_owned())
}

/// Render an error for the request described by `headers` and `path`.
pub fn error_response(err: &GatewayError, headers: &HeaderMap, path: &str) -> Response {
    let correlation_id = resolve_correlation_id(headers);
    let envelope = ErrorEnvelope::from_error(err, path, &correlation_id);
    let mut response = (err.status(), Json(envelope)).into_response();

    if let GatewayError::RateLimitExceeded { retry_after, .. } = err {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs(*retry_after)));
    }
    response
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let path = correlation::current_scope()
            .map(|scope| scope.path)
            .unwrap_or_default();
        error_response(&self, &HeaderMap::new(), &path)
    }
}

/// Panic handler for `CatchPanicLayer`; only the panic message leaves the process.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else {
        "Internal server error".to_owned()
    };

    tracing::error!(panic = %message, "Request handler panicked");
    GatewayError::Internal(message).into_response()
}

/// Whole seconds for `Retry-After`, rounded up, never zero.
pub fn retry_after_secs(interval: Duration) -> u64 {
    let millis = interval.as_millis() as u64;
    millis.div_ceil(1000).max(1)
}

fn reason_phrase(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("Unknown Status")
}
