//! REST API endpoints for the gateway

pub mod health;

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use utoipa::OpenApi;

use crate::state::GatewayState;

#[derive(OpenApi)]
#[openapi(
    paths(health::health_check, crate::websocket::chat::chat_websocket_handler),
    components(schemas(health::HealthResponse, crate::error::ErrorResponse)),
    tags(
        (name = "health", description = "Service status"),
        (name = "chat", description = "Realtime group chat over websocket"),
    )
)]
pub struct ApiDoc;

/// Create all REST API routes
pub fn create_rest_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api-docs/openapi.json", get(openapi_document))
}

async fn openapi_document() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub use health::*;
