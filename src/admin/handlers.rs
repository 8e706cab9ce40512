use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::resilience::circuit_breaker::BreakerSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
}

#[derive(Serialize)]
pub struct RateLimitStatus {
    pub enabled: bool,
    pub tracked_clients: usize,
    pub capacity: Option<u64>,
    pub refill_tokens: Option<u64>,
    pub refill_interval_ms: Option<u64>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

pub async fn get_breakers(State(state): State<AdminState>) -> Json<Vec<BreakerSnapshot>> {
    Json(state.breakers.snapshots())
}

pub async fn get_rate_limits(State(state): State<AdminState>) -> Json<RateLimitStatus> {
    let status = match &state.limiter {
        Some(limiter) => {
            let settings = limiter.settings();
            RateLimitStatus {
                enabled: true,
                tracked_clients: limiter.tracked(),
                capacity: Some(settings.capacity),
                refill_tokens: Some(settings.refill_tokens),
                refill_interval_ms: Some(settings.refill_interval.as_millis() as u64),
            }
        }
        None => RateLimitStatus {
            enabled: false,
            tracked_clients: 0,
            capacity: None,
            refill_tokens: None,
            refill_interval_ms: None,
        },
    };
    Json(status)
}

#[cfg(test)]
mod tests {
    use crate::admin::{setup_admin_router, AdminState};
    use crate::config::GatewayConfig;
    use crate::http::server::AppState;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    fn router() -> (axum::Router, AppState) {
        let gateway = AppState::from_config(&GatewayConfig::default()).unwrap();
        (setup_admin_router(AdminState::new("secret", &gateway)), gateway)
    }

    #[tokio::test]
    async fn test_requires_bearer_key() {
        let (app, _) = router();
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/admin/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/admin/status")
                    .header("authorization", "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_breakers_lists_known_targets() {
        let (app, gateway) = router();
        gateway
            .client
            .breakers()
            .get("products")
            .try_acquire()
            .unwrap()
            .record_failure();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/admin/breakers")
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json[0]["target"], "products");
        assert_eq!(json[0]["state"], "closed");
        assert_eq!(json[0]["consecutive_failures"], 1);
    }
}
