//! Shared types for the chat core.

pub mod errors;
pub mod frames;

pub use errors::{ChatError, ChatResult, ConnectionError, DeliveryError};
pub use frames::{AttachmentRef, InboundFrame, OutboundAttachment, OutboundFrame, OutboundUser};
