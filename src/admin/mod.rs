//! Admin API: read-only views of breaker and limiter state.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{middleware, routing::get, Router};

use crate::http::server::AppState;
use crate::resilience::circuit_breaker::BreakerRegistry;
use crate::security::rate_limit::TokenBucketLimiter;

use self::auth::admin_auth_middleware;
use self::handlers::{get_breakers, get_rate_limits, get_status};

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub api_key: Arc<str>,
    pub breakers: Arc<BreakerRegistry>,
    pub limiter: Option<Arc<TokenBucketLimiter>>,
    pub started_at: Instant,
}

impl AdminState {
    pub fn new(api_key: &str, gateway: &AppState) -> Self {
        Self {
            api_key: Arc::from(api_key),
            breakers: gateway.client.breakers().clone(),
            limiter: gateway.limiter.clone(),
            started_at: Instant::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/rate-limits", get(get_rate_limits))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
