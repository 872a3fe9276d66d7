//! Middleware for authentication and other cross-cutting concerns

use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use huddle_chat::Identity;
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

use crate::error::GatewayError;
use crate::state::GatewayState;

const TOKEN_COOKIE: &str = "token";

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Verify the session token and attach the caller's [`Identity`] to the request.
pub async fn auth_middleware(
    State(state): State<Arc<GatewayState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let token = extract_token(&request).ok_or_else(|| {
        GatewayError::AuthenticationFailed("Missing authentication token".to_string())
    })?;

    let (user, _session) = state.authenticator.authenticate_token(&token).await?;
    debug!(user_id = %user.public_id, "request authenticated");

    request
        .extensions_mut()
        .insert(Identity::new(user.public_id, user.display_name));

    Ok(next.run(request).await)
}

/// Find the session token in the `Authorization` header, the `token` cookie or
/// the `token` query parameter, in that order.
fn extract_token(request: &Request) -> Option<String> {
    bearer_token(request.headers())
        .or_else(|| cookie_token(request.headers()))
        .or_else(|| {
            Query::<TokenQuery>::try_from_uri(request.uri())
                .ok()
                .and_then(|Query(query)| query.token)
        })
        .filter(|token| !token.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == TOKEN_COOKIE)
        .map(|(_, value)| value.to_string())
}

/// Logging middleware for request/response logging
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let start = std::time::Instant::now();
    let response = next.run(request).await;
    let duration = start.elapsed();

    tracing::info!(
        method = %method,
        uri = %uri.path(),
        status = %response.status(),
        duration_ms = duration.as_millis(),
        "Request completed"
    );

    response
}

/// CORS layer for browser clients
pub fn create_cors_middleware() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::ACCEPT, header::CONTENT_TYPE])
}
