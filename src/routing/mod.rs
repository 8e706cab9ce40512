//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → router.rs (route lookup)
//!     → matcher.rs (evaluate match conditions)
//!     → Return: matched Route (with its Upstream) or no match
//!
//! Route Compilation (startup and config reload):
//!     GatewayConfig { upstreams, routes }
//!     → Sort by priority
//!     → Compile matchers
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route
//! - First match wins (ordered by priority)

pub mod matcher;
pub mod router;

pub use router::{Route, RouteTable};
