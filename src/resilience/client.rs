//! Resilient outbound HTTP client.
//!
//! # Data Flow
//! ```text
//! invoke(target, request, correlation)
//!     → circuit breaker admission (fail fast when open)
//!     → attempt: stamp correlation id, send, bounded by the upstream timeout
//!     → classify: success | 4xx | 5xx | timeout | connect
//!     → transient failure and attempts left: backoff, loop
//!     → otherwise surface a GatewayError
//! ```
//!
//! Dropping the future returned by [`ResilientClient::invoke`] abandons the
//! in-flight attempt and schedules nothing further.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, Method, Request, Response, StatusCode, Uri},
};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::time::Instant;
use url::Url;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::observability::correlation::CorrelationId;
use crate::observability::metrics;
use crate::resilience::circuit_breaker::{BreakerRegistry, BreakerSettings};
use crate::resilience::retries::{FailureClass, RetryPolicy};
use crate::resilience::timeouts::enforce;

/// Largest downstream error body kept for translation.
const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

/// A named downstream service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub name: String,
    pub base_url: Url,
}

impl Upstream {
    pub fn new(name: impl Into<String>, base_url: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            name: name.into(),
            base_url: Url::parse(base_url)?,
        })
    }

    /// Absolute URI for `path_and_query` below the base URL.
    pub fn uri_for(&self, path_and_query: &str) -> Result<Uri, GatewayError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let suffix = if path_and_query.starts_with('/') {
            path_and_query.to_owned()
        } else {
            format!("/{}", path_and_query)
        };
        format!("{}{}", base, suffix)
            .parse()
            .map_err(|e| GatewayError::Internal(format!("invalid upstream uri: {}", e)))
    }
}

/// A replayable outbound request.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamRequest {
    pub fn new(method: Method, path_and_query: impl Into<String>) -> Self {
        Self {
            method,
            path_and_query: path_and_query.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(path_and_query: impl Into<String>) -> Self {
        Self::new(Method::GET, path_and_query)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// Result of a single attempt.
enum Attempt {
    Success(Response<Body>),
    Failed {
        class: FailureClass,
        error: GatewayError,
    },
}

/// Outbound client combining timeout, circuit breaker and retry.
#[derive(Clone)]
pub struct ResilientClient {
    http: Client<HttpConnector, Body>,
    breakers: Arc<BreakerRegistry>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
}

impl ResilientClient {
    pub fn new(
        breakers: Arc<BreakerRegistry>,
        retry: RetryPolicy,
        attempt_timeout: Duration,
        connect_timeout: Duration,
    ) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);
        let http = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            http,
            breakers,
            retry,
            attempt_timeout,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        let breakers = Arc::new(BreakerRegistry::new(BreakerSettings::from(&config.circuit_breaker)));
        Self::new(
            breakers,
            RetryPolicy::from(&config.retries),
            Duration::from_millis(config.timeouts.upstream_ms),
            Duration::from_millis(config.timeouts.connect_ms),
        )
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Call `target`, retrying transient failures, with `correlation` on every attempt.
    pub async fn invoke(
        &self,
        target: &Upstream,
        request: UpstreamRequest,
        correlation: &CorrelationId,
    ) -> Result<Response<Body>, GatewayError> {
        let uri = target.uri_for(&request.path_and_query)?;
        let breaker = self.breakers.get(&target.name);
        let max_attempts = self.retry.attempts_for(&request.method);
        let mut attempt = 0;
        let mut last_error: Option<GatewayError> = None;

        loop {
            attempt += 1;

            let permit = match breaker.try_acquire() {
                Ok(permit) => permit,
                Err(open) => {
                    metrics::record_upstream_attempt(&target.name, FailureClass::CircuitOpen.as_str());
                    // Once the upstream has answered, its own failure is what the caller sees.
                    if let Some(error) = last_error {
                        tracing::warn!(
                            upstream = %target.name,
                            attempts = attempt - 1,
                            error = %error,
                            "Circuit opened during retries, surfacing last failure"
                        );
                        return Err(error);
                    }
                    tracing::warn!(upstream = %target.name, "Circuit open, failing fast");
                    return Err(GatewayError::UpstreamUnavailable { target: open.target });
                }
            };

            let (class, error) = match self.attempt(target, &uri, &request, correlation).await {
                Attempt::Success(response) => {
                    permit.record_success();
                    metrics::record_upstream_attempt(&target.name, "success");
                    return Ok(response);
                }
                Attempt::Failed { class, error } => (class, error),
            };

            metrics::record_upstream_attempt(&target.name, class.as_str());
            if class.is_transient() {
                permit.record_failure();
            } else {
                // 4xx: the upstream is healthy, the request is not.
                permit.record_success();
            }

            if !self.retry.should_retry(attempt, max_attempts, class) {
                if class.is_transient() {
                    tracing::warn!(
                        upstream = %target.name,
                        attempts = attempt,
                        error = %error,
                        "Upstream call failed"
                    );
                }
                return Err(error);
            }

            let delay = self.retry.backoff.delay(attempt);
            tracing::info!(
                upstream = %target.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                failure = class.as_str(),
                "Retrying upstream call"
            );
            metrics::record_retry(&target.name);
            last_error = Some(error);
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(
        &self,
        target: &Upstream,
        uri: &Uri,
        request: &UpstreamRequest,
        correlation: &CorrelationId,
    ) -> Attempt {
        let started = Instant::now();

        let mut outbound = Request::new(Body::from(request.body.clone()));
        *outbound.method_mut() = request.method.clone();
        *outbound.uri_mut() = uri.clone();
        *outbound.headers_mut() = request.headers.clone();
        correlation.attach_outbound(outbound.headers_mut());

        tracing::debug!(upstream = %target.name, method = %request.method, uri = %uri, "Sending upstream request");

        let response = match enforce(self.attempt_timeout, self.http.request(outbound)).await {
            Err(_) => return self.timed_out(target),
            Ok(Err(e)) => {
                return Attempt::Failed {
                    class: FailureClass::Connect,
                    error: GatewayError::UpstreamConnect {
                        target: target.name.clone(),
                        reason: e.to_string(),
                    },
                }
            }
            Ok(Ok(response)) => boxed(response),
        };

        let status = response.status();
        let Some(class) = FailureClass::of_status(status) else {
            return Attempt::Success(response);
        };

        // The error body is read under what is left of the attempt budget.
        let remaining = self.attempt_timeout.saturating_sub(started.elapsed());
        let body = match enforce(
            remaining,
            axum::body::to_bytes(response.into_body(), MAX_ERROR_BODY_BYTES),
        )
        .await
        {
            Err(_) => return self.timed_out(target),
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                tracing::warn!(
                    upstream = %target.name,
                    status = status.as_u16(),
                    limit = MAX_ERROR_BODY_BYTES,
                    error = %e,
                    "Failed to read upstream error body, translating without it"
                );
                Bytes::new()
            }
        };

        Attempt::Failed {
            class,
            error: upstream_error(target, status, body),
        }
    }

    fn timed_out(&self, target: &Upstream) -> Attempt {
        Attempt::Failed {
            class: FailureClass::Timeout,
            error: GatewayError::UpstreamTimeout {
                target: target.name.clone(),
                elapsed: self.attempt_timeout,
            },
        }
    }
}

fn boxed(response: Response<Incoming>) -> Response<Body> {
    response.map(Body::new)
}

fn upstream_error(target: &Upstream, status: StatusCode, body: Bytes) -> GatewayError {
    GatewayError::UpstreamError {
        target: target.name.clone(),
        status,
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_for_joins_base_and_path() {
        let upstream = Upstream::new("api", "http://127.0.0.1:8081/internal/").unwrap();
        assert_eq!(
            upstream.uri_for("/products?page=1").unwrap().to_string(),
            "http://127.0.0.1:8081/internal/products?page=1"
        );

        let bare = Upstream::new("api", "http://127.0.0.1:8081").unwrap();
        assert_eq!(bare.uri_for("health").unwrap().to_string(), "http://127.0.0.1:8081/health");
    }

    #[tokio::test]
    async fn test_open_breaker_fails_without_network() {
        let registry = Arc::new(BreakerRegistry::new(BreakerSettings {
            enabled: true,
            failure_threshold: 1,
            cooldown: Duration::from_secs(60),
        }));
        registry.get("ghost").try_acquire().unwrap().record_failure();

        let client = ResilientClient::new(
            registry,
            RetryPolicy::none(),
            Duration::from_millis(200),
            Duration::from_millis(200),
        );
        // Nothing listens on this port; an attempt would be a connect error instead.
        let target = Upstream::new("ghost", "http://127.0.0.1:9").unwrap();
        let err = client
            .invoke(&target, UpstreamRequest::get("/"), &CorrelationId::from("abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamUnavailable { .. }));
    }
}
