//! Message persistence and rendering for broadcasts and history replay.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use huddle_database::{format_timestamp, ChatMessage, CreateAttachmentRequest, CreateMessageRequest};
use tracing::{debug, warn};

use super::ports::{AttachmentResolver, MessageStore};
use crate::connection::Identity;
use crate::types::{
    AttachmentRef, ChatResult, OutboundAttachment, OutboundFrame, OutboundUser,
};

/// Service for storing chat messages and turning them into outbound frames
#[derive(Clone)]
pub struct MessageService {
    store: Arc<dyn MessageStore>,
    resolver: Arc<dyn AttachmentResolver>,
    history_limit: u32,
}

impl MessageService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        resolver: Arc<dyn AttachmentResolver>,
        history_limit: u32,
    ) -> Self {
        Self {
            store,
            resolver,
            history_limit,
        }
    }

    /// Persist a message and its attachment references.
    ///
    /// The returned message is the reloaded, fully populated entity. A sender
    /// that has no user row falls back to the name the connection was admitted
    /// with.
    pub async fn save_message(
        &self,
        room_id: &str,
        sender: &Identity,
        text: &str,
        attachments: &[AttachmentRef],
        created_at: DateTime<Utc>,
    ) -> ChatResult<ChatMessage> {
        let request = CreateMessageRequest {
            room_id: room_id.to_owned(),
            sender_id: sender.user_id.clone(),
            text: text.to_owned(),
            created_at,
            attachments: attachments
                .iter()
                .map(|attachment| CreateAttachmentRequest {
                    file_id: attachment.file_id.clone(),
                    file_name: attachment.file_name.clone(),
                    file_type: attachment.file_type.clone(),
                    file_size: attachment.file_size,
                })
                .collect(),
        };

        let mut message = self.store.create_message(request).await?;
        if message.sender_name.is_empty() {
            message.sender_name = sender.display_name.clone();
        }

        Ok(message)
    }

    /// Resolve download URLs for every attachment of a message.
    ///
    /// Lookups run concurrently and keep the stored order. An attachment whose
    /// URL cannot be generated is logged and left out.
    pub async fn resolve_attachments(&self, message: &ChatMessage) -> Vec<OutboundAttachment> {
        let lookups = message.attachments.iter().map(|attachment| async move {
            match self.resolver.download_url(&attachment.file_id).await {
                Ok(file_url) => Some(OutboundAttachment {
                    id: attachment.public_id.clone(),
                    file_url,
                    file_type: attachment.file_type.clone(),
                    file_size: attachment.file_size,
                }),
                Err(error) => {
                    warn!(
                        message_id = %message.public_id,
                        file_id = %attachment.file_id,
                        error = %format!("{error:#}"),
                        "dropping attachment without download url"
                    );
                    None
                }
            }
        });

        join_all(lookups).await.into_iter().flatten().collect()
    }

    pub async fn render(&self, message: &ChatMessage) -> OutboundFrame {
        OutboundFrame {
            id: message.public_id.clone(),
            user: OutboundUser {
                id: message.sender_id.clone(),
                name: message.sender_name.clone(),
            },
            text: message.text.clone(),
            attachments: self.resolve_attachments(message).await,
            timestamp: format_timestamp(&message.created_at),
        }
    }

    /// Render and serialize a message into the payload queued on connections.
    pub async fn encode(&self, message: &ChatMessage) -> ChatResult<Arc<str>> {
        let frame = self.render(message).await;
        Ok(Arc::from(serde_json::to_string(&frame)?))
    }

    /// The most recent messages of a room in chronological order.
    pub async fn recent_history(&self, room_id: &str) -> ChatResult<Vec<ChatMessage>> {
        let mut messages = self
            .store
            .recent_messages(room_id, self.history_limit)
            .await?;
        messages.reverse();

        debug!(room_id, count = messages.len(), "loaded history for replay");
        Ok(messages)
    }

    pub async fn latest_timestamp(&self, room_id: &str) -> ChatResult<Option<DateTime<Utc>>> {
        let latest = self.store.recent_messages(room_id, 1).await?;
        Ok(latest.first().map(|message| message.created_at))
    }
}
