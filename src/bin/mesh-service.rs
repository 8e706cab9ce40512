//! Internal service hop used to exercise the gateway end to end.
//!
//! `GET /dev/chaos?delayMs=&errorRate=` sleeps, then fails with probability
//! `errorRate`. With `--downstream` the call is forwarded to another hop
//! through a `ResilientClient` carrying the same correlation id.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    routing::get,
    Extension, Router,
};
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use mesh_gateway::config::{GatewayConfig, ObservabilityConfig};
use mesh_gateway::http::response::panic_response;
use mesh_gateway::lifecycle::{shutdown::signalled, signals, Shutdown};
use mesh_gateway::observability::{logging, CorrelationId, CorrelationLayer};
use mesh_gateway::resilience::{ResilientClient, Upstream, UpstreamRequest};
use mesh_gateway::GatewayError;

const DEFAULT_DELAY_MS: u64 = 100;
const DEFAULT_ERROR_RATE: f64 = 0.5;

#[derive(Parser)]
#[command(name = "mesh-service", about = "Chaos service hop")]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1:8081")]
    bind: String,

    /// Forward chaos calls to this service instead of answering locally.
    #[arg(long)]
    downstream: Option<String>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Clone)]
struct ServiceState {
    downstream: Option<Arc<(Upstream, ResilientClient)>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ChaosParams {
    delay_ms: u64,
    error_rate: f64,
}

impl ChaosParams {
    fn parse(query: &HashMap<String, String>) -> Result<Self, GatewayError> {
        let mut field_errors = BTreeMap::new();

        let delay_ms = match query.get("delayMs").map(|v| v.trim().parse::<i64>()) {
            None => DEFAULT_DELAY_MS,
            Some(Ok(ms)) if ms >= 0 => ms as u64,
            Some(_) => {
                field_errors.insert("delayMs".to_string(), "must be a non-negative integer".to_string());
                0
            }
        };

        let error_rate = match query.get("errorRate").map(|v| v.trim().parse::<f64>()) {
            None => DEFAULT_ERROR_RATE,
            Some(Ok(rate)) if (0.0..=1.0).contains(&rate) => rate,
            Some(_) => {
                field_errors.insert("errorRate".to_string(), "must be a number in [0, 1]".to_string());
                0.0
            }
        };

        if field_errors.is_empty() {
            Ok(Self { delay_ms, error_rate })
        } else {
            Err(GatewayError::ValidationFailed { field_errors })
        }
    }
}

async fn chaos(
    State(state): State<ServiceState>,
    Extension(correlation): Extension<CorrelationId>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<String, GatewayError> {
    let params = ChaosParams::parse(&query)?;

    if let Some(downstream) = &state.downstream {
        let (upstream, client) = downstream.as_ref();
        let request = UpstreamRequest::get(format!(
            "/dev/chaos?delayMs={}&errorRate={}",
            params.delay_ms, params.error_rate
        ));
        let response = client.invoke(upstream, request, &correlation).await?;
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        return Ok(String::from_utf8_lossy(&body).into_owned());
    }

    if params.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(params.delay_ms)).await;
    }

    let roll = fastrand::f64();
    if params.error_rate > 0.0 && roll < params.error_rate {
        tracing::warn!(
            delay_ms = params.delay_ms,
            error_rate = params.error_rate,
            roll,
            "Chaos endpoint inducing error"
        );
        return Err(GatewayError::Internal("Chaos induced error".to_string()));
    }

    Ok("OK".to_string())
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/dev/chaos", get(chaos))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(CorrelationLayer)
        .layer(TraceLayer::new_for_http())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    logging::init_logging(&ObservabilityConfig {
        log_level: args.log_level.clone(),
        ..ObservabilityConfig::default()
    });

    let downstream = match &args.downstream {
        Some(url) => {
            let upstream = Upstream::new("downstream", url)?;
            let client = ResilientClient::from_config(&GatewayConfig::default());
            tracing::info!(downstream = %url, "Forwarding chaos calls downstream");
            Some(Arc::new((upstream, client)))
        }
        None => None,
    };

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    let listener = TcpListener::bind(&args.bind).await?;
    tracing::info!(address = %listener.local_addr()?, "mesh-service listening");

    axum::serve(listener, app(ServiceState { downstream }))
        .with_graceful_shutdown(signalled(shutdown.subscribe()))
        .await?;

    tracing::info!("mesh-service stopped");
    Ok(())
}
