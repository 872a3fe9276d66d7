//! Shared application state for the gateway

use huddle_auth::Authenticator;
use huddle_chat::{ChatServer, ConnectionSettings};

/// Everything a request handler needs: identity verification and the chat core.
#[derive(Clone)]
pub struct GatewayState {
    /// Verifies session tokens before a connection is admitted
    pub authenticator: Authenticator,
    /// Handle to the running dispatch server
    pub chat: ChatServer,
    /// Frame limit and timers applied to every websocket connection
    pub connection_settings: ConnectionSettings,
}

impl GatewayState {
    pub fn new(
        authenticator: Authenticator,
        chat: ChatServer,
        connection_settings: ConnectionSettings,
    ) -> Self {
        Self {
            authenticator,
            chat,
            connection_settings,
        }
    }
}
