//! Database repository implementations

pub mod attachment_repository;
pub mod message_repository;

pub use attachment_repository::AttachmentRepository;
pub use message_repository::MessageRepository;
