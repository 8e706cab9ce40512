//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! ResilientClient::invoke (client.rs)
//!     → circuit_breaker.rs (per-target admission: Closed / Open / HalfOpen)
//!     → timeouts.rs (bound each attempt)
//!     → retries.rs (classify the outcome, decide on another attempt)
//!     → backoff.rs (delay before the next attempt)
//! ```
//!
//! # Design Decisions
//! - One breaker per upstream name, shared by every caller
//! - Only timeouts, connection failures and 5xx count as failures
//! - The correlation id is re-attached on every attempt

pub mod backoff;
pub mod circuit_breaker;
pub mod client;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{BreakerRegistry, CircuitBreaker, CircuitState};
pub use client::{ResilientClient, Upstream, UpstreamRequest};
pub use retries::{FailureClass, RetryPolicy};
