//! Correlation identifier propagation.
//!
//! # Responsibilities
//! - Resolve the inbound `X-Correlation-Id` or generate a UUID v4
//! - Make the id visible to every stage handling the request
//! - Stamp the same id on outbound calls and on the final response
//!
//! # Design Decisions
//! - The id is threaded explicitly: it lives in the request extensions and is
//!   handed to the outbound client by the caller
//! - A task-local scope mirrors the id for code that has no request at hand
//!   (panic rendering, error fallback); the scope ends with the response future
//! - Inbound values are reused verbatim, no format validation

use std::fmt;
use std::future::Future;
use std::task::{Context, Poll};

use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response};
use futures_util::future::BoxFuture;
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Correlation header used on every hop.
pub const X_CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");

tokio::task_local! {
    static SCOPE: RequestScope;
}

/// Identifier shared by every hop and log line of one request.
///
/// An inbound value is kept as the exact header bytes it arrived with, so
/// ids carrying obs-text are echoed unchanged; [`as_str`](Self::as_str) is a
/// lossy UTF-8 rendering for logs and error bodies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId {
    text: String,
    raw: Option<HeaderValue>,
}

impl CorrelationId {
    /// Generate a fresh random (v4) identifier.
    pub fn generate() -> Self {
        Self {
            text: Uuid::new_v4().to_string(),
            raw: None,
        }
    }

    /// Reuse a non-blank inbound value byte for byte, or generate a new identifier.
    pub fn resolve_or_generate(incoming: Option<&HeaderValue>) -> Self {
        match incoming {
            Some(value) if !value.as_bytes().iter().all(u8::is_ascii_whitespace) => Self {
                text: String::from_utf8_lossy(value.as_bytes()).into_owned(),
                raw: Some(value.clone()),
            },
            _ => Self::generate(),
        }
    }

    /// Resolve from the correlation header of a header map.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self::resolve_or_generate(headers.get(X_CORRELATION_ID))
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Set the correlation header on a request about to leave this process.
    pub fn attach_outbound(&self, headers: &mut HeaderMap) {
        self.stamp(headers);
    }

    /// Set the correlation header on a response about to reach the caller.
    pub fn attach_response(&self, headers: &mut HeaderMap) {
        self.stamp(headers);
    }

    fn header_value(&self) -> Option<HeaderValue> {
        match &self.raw {
            Some(raw) => Some(raw.clone()),
            None => HeaderValue::from_str(&self.text).ok(),
        }
    }

    fn stamp(&self, headers: &mut HeaderMap) {
        match self.header_value() {
            Some(value) => {
                headers.insert(X_CORRELATION_ID, value);
            }
            None => {
                tracing::warn!(correlation_id = %self.text, "Correlation id is not a valid header value");
            }
        }
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self {
            text: value.to_owned(),
            raw: None,
        }
    }
}

/// Request-scoped binding visible through [`current`] while a request is handled.
#[derive(Debug, Clone)]
pub struct RequestScope {
    pub correlation_id: CorrelationId,
    pub path: String,
}

/// Correlation id of the request currently being handled on this task, if any.
pub fn current() -> Option<CorrelationId> {
    SCOPE.try_with(|scope| scope.correlation_id.clone()).ok()
}

/// Full request scope of the current task, if any.
pub fn current_scope() -> Option<RequestScope> {
    SCOPE.try_with(Clone::clone).ok()
}

/// Run `fut` with `scope` bound; the binding is gone once `fut` finishes or is dropped.
pub async fn scoped<F: Future>(scope: RequestScope, fut: F) -> F::Output {
    SCOPE.scope(scope, fut).await
}

/// Tower layer resolving, binding and echoing the correlation id.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationLayer;

impl<S> Layer<S> for CorrelationLayer {
    type Service = CorrelationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct CorrelationService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CorrelationService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        let id = CorrelationId::from_headers(request.headers());
        id.attach_outbound(request.headers_mut());
        request.extensions_mut().insert(id.clone());

        let span = tracing::info_span!(
            "request",
            correlation_id = %id,
            method = %request.method(),
            path = %request.uri().path(),
        );
        let scope = RequestScope {
            correlation_id: id.clone(),
            path: request.uri().path().to_owned(),
        };

        // The clone that was polled ready is the one that must be called.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(
            async move {
                let mut response = scoped(scope, async move { inner.call(request).await }).await?;
                id.attach_response(response.headers_mut());
                Ok(response)
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get, Extension, Router};
    use tower::ServiceExt;
    use uuid::Version;

    #[test]
    fn test_reuses_inbound_value_verbatim() {
        let value = HeaderValue::from_static("abc-123");
        let id = CorrelationId::resolve_or_generate(Some(&value));
        assert_eq!(id.as_str(), "abc-123");
    }

    #[test]
    fn test_blank_or_missing_header_generates_uuid_v4() {
        let blank = HeaderValue::from_static("   ");
        for id in [
            CorrelationId::resolve_or_generate(None),
            CorrelationId::resolve_or_generate(Some(&blank)),
        ] {
            let parsed = Uuid::parse_str(id.as_str()).expect("generated id is a uuid");
            assert_eq!(parsed.get_version(), Some(Version::Random));
            assert_eq!(id.as_str().len(), 36);
        }
    }

    #[test]
    fn test_attach_outbound_overwrites_existing_header() {
        let mut headers = HeaderMap::new();
        headers.insert(X_CORRELATION_ID, HeaderValue::from_static("stale"));
        CorrelationId::from("fresh").attach_outbound(&mut headers);
        assert_eq!(headers.get(X_CORRELATION_ID).unwrap(), "fresh");
        assert_eq!(headers.get_all(X_CORRELATION_ID).iter().count(), 1);
    }

    #[tokio::test]
    async fn test_layer_echoes_and_scopes_id() {
        let app = Router::new()
            .route(
                "/",
                get(|Extension(id): Extension<CorrelationId>| async move {
                    let scoped = current().map(|c| c.to_string()).unwrap_or_default();
                    format!("{}|{}", id, scoped)
                }),
            )
            .layer(CorrelationLayer);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("x-correlation-id", "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers().get(X_CORRELATION_ID).unwrap(), "abc-123");
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"abc-123|abc-123");

        // The binding never outlives the request.
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn test_layer_echoes_non_utf8_id_byte_for_byte() {
        let inbound = HeaderValue::from_bytes(b"caf\xe9-1").unwrap();
        let app = Router::new()
            .route(
                "/",
                get(|headers: HeaderMap| async move {
                    // The stage behind the layer sees the same bytes.
                    headers.get(X_CORRELATION_ID).unwrap().as_bytes().to_vec()
                }),
            )
            .layer(CorrelationLayer);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(X_CORRELATION_ID, inbound.clone())
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers().get(X_CORRELATION_ID).unwrap(), &inbound);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"caf\xe9-1");

        let id = CorrelationId::resolve_or_generate(Some(&inbound));
        assert_eq!(id.as_str(), "caf\u{fffd}-1");
    }

    #[tokio::test]
    async fn test_layer_generates_id_for_response() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(CorrelationLayer);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let id = response.headers().get(X_CORRELATION_ID).unwrap().to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }
}
