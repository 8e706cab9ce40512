//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!
//! On file change (--watch):
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server swaps its route table
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Limiter, breaker and retry settings are read once at startup; only routes reload

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, CircuitBreakerConfig, GatewayConfig, ListenerConfig, ObservabilityConfig,
    RateLimitConfig, RetryConfig, RouteConfig, SecurityConfig, TimeoutConfig, UpstreamConfig,
};
pub use watcher::ConfigWatcher;
