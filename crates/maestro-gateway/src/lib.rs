//! HTTP and WebSocket gateway for Maestro.
//!
//! Exposes the orchestrator's start / status / list / cancel operations as
//! a JSON API and streams execution snapshots over WebSocket.

/// Error bodies and status mapping.
pub mod error;
/// API-key authentication.
pub mod middleware;
/// Execution, pattern and metrics handlers.
pub mod router;
/// Router assembly and shared state.
pub mod server;
/// Live execution stream.
pub mod stream;

pub use error::ApiError;
pub use middleware::AuthConfig;
pub use server::{AppState, GatewayServer};
