use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::GatewayState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    /// Websocket connections currently admitted to the chat core
    pub active_connections: usize,
    /// Rooms that currently have at least one member
    pub active_rooms: usize,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service health status", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<Arc<GatewayState>>) -> Json<HealthResponse> {
    let status = if state.chat.is_running() { "ok" } else { "stopping" };

    Json(HealthResponse {
        status: status.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        active_connections: state.chat.active_connections(),
        active_rooms: state.chat.active_rooms().await.len(),
    })
}
