//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → correlation.rs (resolve X-Correlation-Id, open request span, task-local scope)
//!
//! All subsystems produce:
//!     → logging.rs (structured log events carrying correlation_id)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Correlation ID flows through all subsystems and every outbound hop
//! - Metrics are cheap (atomic increments)

pub mod correlation;
pub mod logging;
pub mod metrics;

pub use correlation::{CorrelationId, CorrelationLayer, X_CORRELATION_ID};
