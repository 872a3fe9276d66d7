//! Attachment entity definitions

use serde::{Deserialize, Serialize};

/// A file reference stored alongside its parent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageAttachment {
    pub id: i64,
    pub public_id: String,
    pub message_id: i64,
    pub position: i64,
    pub file_id: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAttachmentRequest {
    pub file_id: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
}
