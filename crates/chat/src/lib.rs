//! # Huddle Chat Crate
//!
//! The realtime core of Huddle: a dispatch server that owns the room registry,
//! one hub per active room that persists and fans out messages, and the
//! read/write loops that connect each websocket client to them.
//!
//! ## Architecture
//!
//! - **Connection**: identity plus a bounded outbound buffer, drained by the
//!   write loop and fed without blocking by hubs and history replay
//! - **Server**: the single command queue and the room registry
//! - **Hub**: per-room membership, ordering and fan-out
//! - **Services**: message persistence and attachment URL resolution behind
//!   the [`MessageStore`] and [`AttachmentResolver`] seams

pub mod connection;
pub mod server;
pub mod services;
pub mod types;

pub use connection::transport::{
    read_loop, serve_connection, write_loop, ConnectionSettings, WireFrame,
};
pub use connection::{ConnectionHandle, ConnectionId, Identity, Outbound, OutboundQueue};
pub use server::{ChatServer, Command};
pub use services::{AttachmentResolver, MessageService, MessageStore};
pub use types::{
    AttachmentRef, ChatError, ChatResult, ConnectionError, DeliveryError, InboundFrame,
    OutboundAttachment, OutboundFrame, OutboundUser,
};
