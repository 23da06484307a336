//! Engine gateway
//!
//! Single-tenant HTTP gateway in front of a locally supervised query engine.
//! Features:
//! - Shared-secret authentication on every path
//! - Read/write token bucket rate limiting
//! - Engine process supervision with port reclaiming
//! - Retrying forwarder with body normalization
//! - Introspection answered from the engine's schema document
//! - Optional idle shutdown and key-value command bridge

#![allow(missing_docs)]

use anyhow::Result;

pub mod auth;
pub mod command_bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod forwarder;
pub mod introspection;
pub mod metrics;
pub mod middleware;
pub mod playground;
pub mod rate_limiter;
pub mod readiness;
pub mod server;
pub mod sleep_mode;
pub mod supervisor;

pub use config::{GatewayConfig, RateLimitConfig, ServerConfig, AuthConfig, EngineConfig};
pub use error::{GatewayError, GatewayResult};
pub use server::{AppState, GatewayServer, create_router};

/// Start the gateway and run until shutdown
pub async fn start_server(config: GatewayConfig) -> Result<()> {
    let server = GatewayServer::new(config)?;
    server.start().await
}
