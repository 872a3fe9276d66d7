//! Error types for the gateway layer

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use huddle_auth::AuthError;
use huddle_chat::ChatError;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Gateway error types
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Service unavailable")]
    ServiceUnavailable,
}

/// Body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            GatewayError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: status.as_str().to_string(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<AuthError> for GatewayError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Database(error) => GatewayError::InternalError(error.to_string()),
            other => GatewayError::AuthenticationFailed(other.to_string()),
        }
    }
}

impl From<ChatError> for GatewayError {
    fn from(error: ChatError) -> Self {
        match error {
            ChatError::ServerClosed => GatewayError::ServiceUnavailable,
            other => GatewayError::InternalError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_map_to_unauthorized() {
        for error in [
            AuthError::SessionNotFound,
            AuthError::SessionExpired,
            AuthError::InvalidSession,
            AuthError::UserNotFound,
        ] {
            assert_eq!(GatewayError::from(error).status_code(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn closed_chat_server_is_unavailable() {
        assert_eq!(
            GatewayError::from(ChatError::ServerClosed).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
