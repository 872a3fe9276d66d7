//! Seams to the external collaborators of the chat core.

use async_trait::async_trait;
use huddle_database::{ChatMessage, CreateMessageRequest, DatabaseResult, MessageRepository};
use huddle_files::FileServiceClient;

/// Durable, append-only storage for chat messages and their attachments.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Store a message with its attachments in one logical write and return it
    /// reloaded with sender and attachments populated.
    async fn create_message(&self, request: CreateMessageRequest) -> DatabaseResult<ChatMessage>;

    /// The `limit` most recent messages of a room, newest first.
    async fn recent_messages(&self, room_id: &str, limit: u32) -> DatabaseResult<Vec<ChatMessage>>;
}

/// Turns a stored file reference into a time-limited download URL.
#[async_trait]
pub trait AttachmentResolver: Send + Sync {
    async fn download_url(&self, file_id: &str) -> anyhow::Result<String>;
}

#[async_trait]
impl MessageStore for MessageRepository {
    async fn create_message(&self, request: CreateMessageRequest) -> DatabaseResult<ChatMessage> {
        self.create(&request).await
    }

    async fn recent_messages(&self, room_id: &str, limit: u32) -> DatabaseResult<Vec<ChatMessage>> {
        self.recent_for_room(room_id, limit).await
    }
}

#[async_trait]
impl AttachmentResolver for FileServiceClient {
    async fn download_url(&self, file_id: &str) -> anyhow::Result<String> {
        Ok(self.generate_download_url(file_id).await?)
    }
}
