//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use futures_util::future::BoxFuture;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use mesh_gateway::config::{GatewayConfig, RouteConfig, UpstreamConfig};
use mesh_gateway::{GatewayServer, Shutdown};

type Responder = Arc<dyn Fn(u32) -> BoxFuture<'static, (u16, String)> + Send + Sync>;

#[derive(Clone)]
struct BackendState {
    hits: Arc<AtomicU32>,
    seen_ids: Arc<Mutex<Vec<String>>>,
    respond: Responder,
}

/// A running mock upstream.
pub struct Backend {
    pub addr: SocketAddr,
    hits: Arc<AtomicU32>,
    seen_ids: Arc<Mutex<Vec<String>>>,
}

impl Backend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Requests received so far.
    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }

    /// `X-Correlation-Id` values received, in arrival order.
    pub fn seen_ids(&self) -> Vec<String> {
        self.seen_ids.lock().unwrap().clone()
    }
}

async fn handle(State(state): State<BackendState>, headers: HeaderMap) -> Response {
    let n = state.hits.fetch_add(1, Ordering::SeqCst);
    if let Some(id) = headers.get("x-correlation-id").and_then(|v| v.to_str().ok()) {
        state.seen_ids.lock().unwrap().push(id.to_string());
    }

    let (status, body) = (state.respond)(n).await;
    let status = StatusCode::from_u16(status).unwrap();
    (status, [("content-type", "application/json")], body).into_response()
}

/// Start a backend whose response depends on the zero-based call number.
pub async fn start_programmable_backend<F, Fut>(f: F) -> Backend
where
    F: Fn(u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let hits = Arc::new(AtomicU32::new(0));
    let seen_ids = Arc::new(Mutex::new(Vec::new()));
    let respond: Responder = Arc::new(move |n| Box::pin(f(n)));

    let app = Router::new().fallback(handle).with_state(BackendState {
        hits: hits.clone(),
        seen_ids: seen_ids.clone(),
        respond,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Backend { addr, hits, seen_ids }
}

/// Start a backend that always returns 200 with `body`.
pub async fn start_mock_backend(body: &'static str) -> Backend {
    start_programmable_backend(move |_| async move { (200, body.to_string()) }).await
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Gateway config with one upstream routed at `/`.
pub fn gateway_config(upstream_url: &str) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.observability.metrics_enabled = false;
    config.upstreams.push(UpstreamConfig {
        name: "product-service".into(),
        url: upstream_url.to_string(),
    });
    config.routes.push(RouteConfig {
        name: "all".into(),
        host: None,
        path_prefix: Some("/".into()),
        upstream: "product-service".into(),
        strip_prefix: false,
        priority: 0,
    });
    config.retries.base_delay_ms = 10;
    config.retries.max_delay_ms = 50;
    config
}

/// A running gateway; shut down on drop.
pub struct Gateway {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

impl Gateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_gateway(config: GatewayConfig) -> Gateway {
    let shutdown = Shutdown::new();
    let (updates_tx, config_updates) = mpsc::unbounded_channel();
    let server = GatewayServer::new(config).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        // Keep the update channel open for the server's lifetime.
        let _updates_tx = updates_tx;
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    Gateway { addr, shutdown }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
