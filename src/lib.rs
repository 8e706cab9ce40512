//! Resilient HTTP gateway library.
//!
//! Per-client token-bucket admission, end-to-end correlation ids, and an
//! outbound client with timeouts, per-upstream circuit breakers and retries.

pub mod admin;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod security;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
