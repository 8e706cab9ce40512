//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (per-client token bucket, 429 when empty)
//!     → headers.rs (strip hop-by-hop, add X-Forwarded-*)
//!     → Pass to routing
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any admission check failure
//! - No trust in client input beyond the documented client key headers

pub mod headers;
pub mod rate_limit;

pub use rate_limit::{rate_limit_middleware, TokenBucketLimiter};
