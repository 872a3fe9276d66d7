//! Repository for attachment data access operations.

use std::collections::HashMap;

use sqlx::{sqlite::SqliteRow, Row, Sqlite, SqlitePool, Transaction};

use crate::entities::{CreateAttachmentRequest, MessageAttachment};
use crate::types::DatabaseResult;

/// Repository for attachment database operations
#[derive(Clone)]
pub struct AttachmentRepository {
    pool: SqlitePool,
}

impl AttachmentRepository {
    /// Create a new attachment repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the attachments of a message inside the caller's transaction,
    /// keeping the order they were given in.
    pub(crate) async fn insert_for_message(
        tx: &mut Transaction<'_, Sqlite>,
        message_id: i64,
        created_at: &str,
        attachments: &[CreateAttachmentRequest],
    ) -> DatabaseResult<()> {
        for (position, attachment) in attachments.iter().enumerate() {
            sqlx::query(
                "INSERT INTO message_attachments (public_id, message_id, position, file_id, file_name, file_type, file_size, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(cuid2::create_id())
            .bind(message_id)
            .bind(position as i64)
            .bind(&attachment.file_id)
            .bind(&attachment.file_name)
            .bind(&attachment.file_type)
            .bind(attachment.file_size)
            .bind(created_at)
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }

    /// Find all attachments for a message, in their original order
    pub async fn find_by_message_id(&self, message_id: i64) -> DatabaseResult<Vec<MessageAttachment>> {
        let mut grouped = self.find_by_message_ids(&[message_id]).await?;
        Ok(grouped.remove(&message_id).unwrap_or_default())
    }

    /// Find attachments for several messages at once, grouped by message id
    pub async fn find_by_message_ids(
        &self,
        message_ids: &[i64],
    ) -> DatabaseResult<HashMap<i64, Vec<MessageAttachment>>> {
        if message_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = vec!["?"; message_ids.len()].join(", ");
        let sql = format!(
            "SELECT id, public_id, message_id, position, file_id, file_name, file_type, file_size, created_at
             FROM message_attachments WHERE message_id IN ({placeholders})
             ORDER BY message_id, position"
        );

        let mut query = sqlx::query(&sql);
        for id in message_ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;

        let mut grouped: HashMap<i64, Vec<MessageAttachment>> = HashMap::new();
        for row in rows {
            let attachment = attachment_from_row(&row)?;
            grouped.entry(attachment.message_id).or_default().push(attachment);
        }

        Ok(grouped)
    }
}

fn attachment_from_row(row: &SqliteRow) -> DatabaseResult<MessageAttachment> {
    Ok(MessageAttachment {
        id: row.try_get("id")?,
        public_id: row.try_get("public_id")?,
        message_id: row.try_get("message_id")?,
        position: row.try_get("position")?,
        file_id: row.try_get("file_id")?,
        file_name: row.try_get("file_name")?,
        file_type: row.try_get("file_type")?,
        file_size: row.try_get("file_size")?,
        created_at: row.try_get("created_at")?,
    })
}
