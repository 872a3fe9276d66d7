//! Chat WebSocket handler: upgrades an authenticated request and hands the
//! socket to the chat core's connection loops.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    Extension,
};
use futures_util::{future, SinkExt, StreamExt};
use huddle_chat::{serve_connection, Identity, WireFrame};
use tracing::error;

use crate::state::GatewayState;

#[utoipa::path(
    get,
    path = "/chat",
    tag = "chat",
    params(
        ("token" = Option<String>, Query, description = "Session token, when neither the Authorization header nor the token cookie is set")
    ),
    responses(
        (status = 101, description = "Switching to the chat websocket protocol"),
        (status = 401, description = "Missing or invalid session token", body = crate::error::ErrorResponse)
    )
)]
pub async fn chat_websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
) -> Response {
    let limit = state.connection_settings.max_frame_bytes;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_chat_websocket(socket, state, identity))
}

/// Handle chat WebSocket connection
async fn handle_chat_websocket(socket: WebSocket, state: Arc<GatewayState>, identity: Identity) {
    let (handle, queue) = state.chat.open_connection(identity);
    let connection_id = handle.id();

    let (sender, receiver) = socket.split();
    let sink = Box::pin(sender.with(|frame: WireFrame| {
        future::ready(Ok::<_, axum::Error>(into_message(frame)))
    }));
    let stream = Box::pin(receiver.map(|message| message.map(into_wire_frame)));

    if let Err(error) = serve_connection(
        state.chat.clone(),
        handle,
        queue,
        sink,
        stream,
        state.connection_settings,
    )
    .await
    {
        error!(connection_id = %connection_id, %error, "chat connection could not be served");
    }
}

fn into_message(frame: WireFrame) -> Message {
    match frame {
        WireFrame::Text(text) => Message::Text(text),
        WireFrame::Binary(bytes) => Message::Binary(bytes),
        WireFrame::Ping(bytes) => Message::Ping(bytes),
        WireFrame::Pong(bytes) => Message::Pong(bytes),
        WireFrame::Close => Message::Close(None),
    }
}

fn into_wire_frame(message: Message) -> WireFrame {
    match message {
        Message::Text(text) => WireFrame::Text(text),
        Message::Binary(bytes) => WireFrame::Binary(bytes),
        Message::Ping(bytes) => WireFrame::Ping(bytes),
        Message::Pong(bytes) => WireFrame::Pong(bytes),
        Message::Close(_) => WireFrame::Close,
    }
}
