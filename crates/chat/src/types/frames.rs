//! JSON frames exchanged with websocket clients.

use serde::{Deserialize, Deserializer, Serialize};

/// A decoded client request. The connection it came from travels next to it,
/// never inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    Join {
        room: String,
    },
    Leave {
        room: String,
    },
    Broadcast {
        room: String,
        #[serde(default, deserialize_with = "null_as_default")]
        text: String,
        #[serde(default, deserialize_with = "null_as_default")]
        attachments: Vec<AttachmentRef>,
    },
}

/// Reference to a file already uploaded to the file-storage service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub file_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub file_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub file_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub file_size: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub id: String,
    pub user: OutboundUser,
    pub text: String,
    pub attachments: Vec<OutboundAttachment>,
    /// RFC3339, UTC, microsecond precision.
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundUser {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundAttachment {
    pub id: String,
    pub file_url: String,
    pub file_type: String,
    pub file_size: i64,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
