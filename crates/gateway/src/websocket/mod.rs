//! WebSocket endpoints for the gateway

pub mod chat;

use std::sync::Arc;

use axum::{middleware as axum_middleware, routing::get, Router};

use crate::middleware::auth_middleware;
use crate::state::GatewayState;

/// Create all WebSocket routes. Every one of them requires a verified identity.
pub fn create_websocket_routes(state: Arc<GatewayState>) -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/chat", get(chat::chat_websocket_handler))
        .route_layer(axum_middleware::from_fn_with_state(state, auth_middleware))
}

pub use chat::*;
