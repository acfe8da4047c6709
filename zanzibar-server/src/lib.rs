//! Zanzibar Server - HTTP API for relationship-based authorization
//!
//! Exposes tuple management, authorization checks and namespace schema
//! management over JSON. Callers are identified by the `X-User-ID` header set
//! by the authenticating proxy in front of this service.

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod types;

// Re-export commonly used types
pub use config::Settings;
pub use error::*;
pub use server::ZanzibarServer;

use axum::{middleware::from_fn, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Create the main application router with all routes and middleware
pub fn create_app(server: ZanzibarServer) -> Router {
    routes::create_routes()
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(from_fn(middleware::request_timing_middleware)),
        )
        .with_state(server)
}
