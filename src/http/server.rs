//! HTTP server and the gateway request pipeline.
//!
//! # Responsibilities
//! - Create Axum Router with the proxy handler
//! - Wire up the pipeline layers (tracing, correlation, panic capture, rate limiting)
//! - Dispatch requests to the route table
//! - Forward requests through the resilient client
//! - Run background tasks (bucket sweeper, route reload) until shutdown
//!
//! # Data Flow
//! ```text
//! TraceLayer
//!   → CorrelationLayer      (resolve id, open span, bind request scope, echo id)
//!     → CatchPanicLayer     (panic → 500 envelope, still inside the scope)
//!       → rate_limit        (429 + Retry-After, or X-RateLimit-* on admit)
//!         → proxy_handler   (route → buffer body → ResilientClient::invoke)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::State,
    http::{Method, Request},
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::config::validation::ValidationError;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::http::request::{into_client_response, into_upstream_request};
use crate::http::response::panic_response;
use crate::lifecycle::shutdown::signalled;
use crate::observability::correlation::{CorrelationId, CorrelationLayer};
use crate::observability::metrics;
use crate::resilience::client::ResilientClient;
use crate::resilience::timeouts::{enforce, TimedOut};
use crate::routing::RouteTable;
use crate::security::rate_limit::{rate_limit_middleware, BucketSettings, TokenBucketLimiter};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<ArcSwap<RouteTable>>,
    pub client: ResilientClient,
    pub limiter: Option<Arc<TokenBucketLimiter>>,
    pub max_body_bytes: usize,
    pub request_deadline: Duration,
}

impl AppState {
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ValidationError> {
        let routes = RouteTable::from_config(config)?;
        let limiter = config
            .rate_limit
            .enabled
            .then(|| Arc::new(TokenBucketLimiter::new(BucketSettings::from(&config.rate_limit))));

        Ok(Self {
            routes: Arc::new(ArcSwap::from_pointee(routes)),
            client: ResilientClient::from_config(config),
            limiter,
            max_body_bytes: config.security.max_body_bytes,
            request_deadline: Duration::from_secs(config.timeouts.request_secs),
        })
    }
}

/// HTTP server for the gateway.
pub struct GatewayServer {
    router: Router,
    state: AppState,
    config: GatewayConfig,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig) -> Result<Self, ValidationError> {
        let state = AppState::from_config(&config)?;
        let router = build_pipeline(state.clone());
        Ok(Self {
            router,
            state,
            config,
        })
    }

    /// Shared state, for the admin API.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Serve on `listener` until `shutdown` fires, applying route updates as they arrive.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            routes = self.state.routes.load().len(),
            rate_limit = self.state.limiter.is_some(),
            "Gateway starting"
        );

        if let Some(limiter) = &self.state.limiter {
            let rl = &self.config.rate_limit;
            tokio::spawn(limiter.clone().run_sweeper(
                Duration::from_secs(rl.sweep_interval_secs),
                Duration::from_secs(rl.idle_ttl_secs),
                shutdown.resubscribe(),
            ));
        }

        tokio::spawn(apply_route_updates(
            self.state.routes.clone(),
            config_updates,
            shutdown.resubscribe(),
        ));

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(signalled(shutdown))
            .await?;

        tracing::info!("Gateway stopped");
        Ok(())
    }
}

/// The full request pipeline as an axum Router.
pub fn build_pipeline(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/{*path}", any(proxy_handler))
        .route("/", any(proxy_handler))
        .with_state(state.clone());

    if let Some(limiter) = state.limiter {
        router = router.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
    }

    router
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(CorrelationLayer)
        .layer(TraceLayer::new_for_http())
}

async fn apply_route_updates(
    routes: Arc<ArcSwap<RouteTable>>,
    mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(config) = update else { break };
                match RouteTable::from_config(&config) {
                    Ok(table) => {
                        tracing::info!(routes = table.len(), "Route table reloaded");
                        routes.store(Arc::new(table));
                    }
                    Err(e) => tracing::error!(error = %e, "Rejected route update"),
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

/// Route the request and forward it upstream.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let correlation = request
        .extensions()
        .get::<CorrelationId>()
        .cloned()
        .unwrap_or_else(|| CorrelationId::from_headers(request.headers()));

    let (upstream, path_and_query) = {
        let routes = state.routes.load();
        match routes.match_request(request.uri(), request.headers()) {
            Some(route) => (route.upstream.clone(), route.forward_path(request.uri())),
            None => {
                tracing::warn!(path = %request.uri().path(), "No route matched");
                let err = GatewayError::NoRoute {
                    path: request.uri().path().to_owned(),
                };
                return failed(err, &method, "none", started);
            }
        }
    };

    tracing::debug!(upstream = %upstream.name, forward = %path_and_query, "Proxying request");

    let outbound = match into_upstream_request(request, path_and_query, state.max_body_bytes).await {
        Ok(outbound) => outbound,
        Err(err) => return failed(err, &method, &upstream.name, started),
    };

    let result = enforce(
        state.request_deadline,
        state.client.invoke(&upstream, outbound, &correlation),
    )
    .await
    .unwrap_or_else(|TimedOut(elapsed)| {
        Err(GatewayError::UpstreamTimeout {
            target: upstream.name.clone(),
            elapsed,
        })
    });

    match result {
        Ok(response) => {
            metrics::record_request(
                method.as_str(),
                response.status().as_u16(),
                &upstream.name,
                started.elapsed(),
            );
            into_client_response(response)
        }
        Err(err) => failed(err, &method, &upstream.name, started),
    }
}

fn failed(err: GatewayError, method: &Method, upstream: &str, started: Instant) -> Response {
    metrics::record_request(method.as_str(), err.status().as_u16(), upstream, started.elapsed());
    err.into_response()
}
