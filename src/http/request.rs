//! Request and response transformation around the upstream hop.
//!
//! # Responsibilities
//! - Buffer the inbound body within the configured limit so it can be replayed on retry
//! - Rewrite headers for forwarding (hop-by-hop, X-Forwarded-*)
//! - Strip hop-by-hop headers from the upstream response
//!
//! # Design Decisions
//! - Oversize bodies are a validation failure on field `body`, never a truncation
//! - A declared `Content-Length` over the limit is rejected before any read
//! - A body that fails mid-read (client abort, transport error) is reported as
//!   unreadable, not as oversize

use std::error::Error as StdError;
use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, Response},
};
use http_body_util::LengthLimitError;

use crate::error::GatewayError;
use crate::resilience::client::UpstreamRequest;
use crate::security::headers::{forward_headers, strip_hop_by_hop};

/// Turn an inbound request into a replayable upstream request for `path_and_query`.
pub async fn into_upstream_request(
    request: Request<Body>,
    path_and_query: String,
    max_body_bytes: usize,
) -> Result<UpstreamRequest, GatewayError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > max_body_bytes) {
        return Err(oversize(max_body_bytes));
    }

    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, max_body_bytes)
        .await
        .map_err(|e| {
            if exceeded_limit(&e) {
                oversize(max_body_bytes)
            } else {
                tracing::debug!(error = %e, "Failed to read request body");
                GatewayError::invalid("body", "request body could not be read")
            }
        })?;

    let mut headers = parts.headers;
    forward_headers(&mut headers, peer);
    headers.remove(header::CONTENT_LENGTH);

    Ok(UpstreamRequest {
        method: parts.method,
        path_and_query,
        headers,
        body,
    })
}

fn oversize(max_body_bytes: usize) -> GatewayError {
    GatewayError::invalid(
        "body",
        format!("request body must not exceed {} bytes", max_body_bytes),
    )
}

fn exceeded_limit(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<LengthLimitError>() {
            return true;
        }
        current = e.source();
    }
    false
}

/// Prepare an upstream response for the client.
pub fn into_client_response(mut response: Response<Body>) -> Response<Body> {
    strip_hop_by_hop(response.headers_mut());
    response
}
