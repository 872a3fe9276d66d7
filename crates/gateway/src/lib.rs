//! # Huddle Gateway Crate
//!
//! The HTTP face of Huddle: verifies session tokens, upgrades `/chat` requests
//! to websockets and hands each socket to the chat core, and reports health.
//!
//! ## Architecture
//!
//! - **REST**: health check and the OpenAPI document
//! - **WebSocket**: the authenticated `/chat` upgrade
//! - **State**: authenticator, dispatch server handle and connection settings
//! - **Middleware**: authentication, CORS and request logging

pub mod error;
pub mod middleware;
pub mod rest;
pub mod state;
pub mod websocket;

pub use error::{ErrorResponse, GatewayError, GatewayResult};
pub use middleware::auth_middleware;
pub use rest::ApiDoc;
pub use state::GatewayState;

use std::sync::Arc;

use axum::{middleware as axum_middleware, Router};

/// Create the main application router with all routes
pub fn create_router(state: GatewayState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .merge(rest::create_rest_routes())
        .merge(websocket::create_websocket_routes(state.clone()))
        .with_state(state)
        .layer(middleware::create_cors_middleware())
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
}
