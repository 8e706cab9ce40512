//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, pipeline layers, proxy handler)
//!     → request.rs (buffer body, rewrite headers for the upstream hop)
//!     → [ResilientClient forwards upstream]
//!     → response.rs (error envelopes for anything that failed)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use response::{error_response, translate, ErrorEnvelope};
pub use server::{build_pipeline, AppState, GatewayServer};
