//! Domain entities for the database layer

pub mod attachment;
pub mod message;

pub use attachment::{CreateAttachmentRequest, MessageAttachment};
pub use message::{ChatMessage, CreateMessageRequest};
