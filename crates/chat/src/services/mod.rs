//! Persistence and attachment resolution used by the room hubs.

pub mod message_service;
pub mod ports;

pub use message_service::MessageService;
pub use ports::{AttachmentResolver, MessageStore};
