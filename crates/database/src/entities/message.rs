//! Message entity definitions

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::attachment::{CreateAttachmentRequest, MessageAttachment};
use crate::types::{errors::DatabaseError, DatabaseResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub public_id: String,
    pub room_id: String,
    pub sender_id: String,
    /// Display name of the sender, empty when the user row is gone.
    pub sender_name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub attachments: Vec<MessageAttachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessageRequest {
    pub room_id: String,
    pub sender_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub attachments: Vec<CreateAttachmentRequest>,
}

/// Render a timestamp in the fixed-width form stored in `created_at` columns.
///
/// Every value has microsecond precision and a `Z` suffix, so lexical order of
/// the stored text matches chronological order.
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(value: &str) -> DatabaseResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|e| DatabaseError::ValidationError(format!("invalid timestamp {value}: {e}")))
}
