//! Repository for message data access operations.

use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, info};

use super::attachment_repository::AttachmentRepository;
use crate::entities::message::{format_timestamp, parse_timestamp};
use crate::entities::{ChatMessage, CreateMessageRequest};
use crate::types::{errors::DatabaseError, DatabaseResult};

const MESSAGE_COLUMNS: &str = "m.id, m.public_id, m.room_id, m.sender_id, m.text, m.created_at,
     COALESCE(u.display_name, '') AS sender_name";

/// Repository for message database operations
#[derive(Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
    attachments: AttachmentRepository,
}

impl MessageRepository {
    /// Create a new message repository
    pub fn new(pool: SqlitePool) -> Self {
        let attachments = AttachmentRepository::new(pool.clone());
        Self { pool, attachments }
    }

    /// Store a message and its attachments in one transaction, then reload it
    /// with the sender and attachment relations populated.
    pub async fn create(&self, request: &CreateMessageRequest) -> DatabaseResult<ChatMessage> {
        if request.room_id.is_empty() {
            return Err(DatabaseError::ValidationError(
                "room id must not be empty".to_string(),
            ));
        }

        let public_id = cuid2::create_id();
        let created_at = format_timestamp(&request.created_at);

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO chat_messages (public_id, room_id, sender_id, text, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&public_id)
        .bind(&request.room_id)
        .bind(&request.sender_id)
        .bind(&request.text)
        .bind(&created_at)
        .execute(&mut *tx)
        .await?;

        let message_id = result.last_insert_rowid();

        AttachmentRepository::insert_for_message(
            &mut tx,
            message_id,
            &created_at,
            &request.attachments,
        )
        .await?;

        tx.commit().await?;

        info!(
            message_id = %public_id,
            room_id = %request.room_id,
            sender_id = %request.sender_id,
            attachments = request.attachments.len(),
            "created new message"
        );

        self.find_by_id(message_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("message {public_id}")))
    }

    /// Most recent messages of a room, newest first.
    pub async fn recent_for_room(&self, room_id: &str, limit: u32) -> DatabaseResult<Vec<ChatMessage>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM chat_messages m LEFT JOIN users u ON u.public_id = m.sender_id
             WHERE m.room_id = ? ORDER BY m.created_at DESC, m.id DESC LIMIT ?"
        );

        let rows = sqlx::query(&sql)
            .bind(room_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        let mut messages = rows
            .iter()
            .map(message_from_row)
            .collect::<DatabaseResult<Vec<_>>>()?;

        let ids: Vec<i64> = messages.iter().map(|message| message.id).collect();
        let mut attachments = self.attachments.find_by_message_ids(&ids).await?;
        for message in &mut messages {
            message.attachments = attachments.remove(&message.id).unwrap_or_default();
        }

        debug!(room_id, count = messages.len(), "loaded room history");
        Ok(messages)
    }

    async fn find_by_id(&self, id: i64) -> DatabaseResult<Option<ChatMessage>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM chat_messages m LEFT JOIN users u ON u.public_id = m.sender_id
             WHERE m.id = ?"
        );

        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        self.with_attachments(row).await
    }

    async fn with_attachments(&self, row: Option<SqliteRow>) -> DatabaseResult<Option<ChatMessage>> {
        let Some(row) = row else {
            return Ok(None);
        };

        let mut message = message_from_row(&row)?;
        message.attachments = self.attachments.find_by_message_id(message.id).await?;
        Ok(Some(message))
    }
}

fn message_from_row(row: &SqliteRow) -> DatabaseResult<ChatMessage> {
    let created_at: String = row.try_get("created_at")?;

    Ok(ChatMessage {
        id: row.try_get("id")?,
        public_id: row.try_get("public_id")?,
        room_id: row.try_get("room_id")?,
        sender_id: row.try_get("sender_id")?,
        sender_name: row.try_get("sender_name")?,
        text: row.try_get("text")?,
        created_at: parse_timestamp(&created_at)?,
        attachments: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::CreateAttachmentRequest;
    use crate::initialize_database;
    use chrono::{Duration, Utc};
    use huddle_config::DatabaseConfig;
    use tempfile::TempDir;

    async fn setup() -> (MessageRepository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            url: format!("sqlite://{}", temp_dir.path().join("messages.db").display()),
            max_connections: 2,
        };
        let pool = initialize_database(&config).await.unwrap();

        sqlx::query(
            "INSERT INTO users (public_id, email, display_name, created_at, updated_at)
             VALUES ('user-alice', 'alice@example.com', 'Alice', '2024-01-01T00:00:00.000000Z', '2024-01-01T00:00:00.000000Z')",
        )
        .execute(&pool)
        .await
        .unwrap();

        (MessageRepository::new(pool), temp_dir)
    }

    fn request(room: &str, text: &str, at: chrono::DateTime<Utc>) -> CreateMessageRequest {
        CreateMessageRequest {
            room_id: room.to_string(),
            sender_id: "user-alice".to_string(),
            text: text.to_string(),
            created_at: at,
            attachments: Vec::new(),
        }
    }

    fn attachment(file_id: &str) -> CreateAttachmentRequest {
        CreateAttachmentRequest {
            file_id: file_id.to_string(),
            file_name: format!("{file_id}.png"),
            file_type: "image/png".to_string(),
            file_size: 2048,
        }
    }

    #[tokio::test]
    async fn create_populates_sender_and_attachments_in_order() {
        let (repo, _dir) = setup().await;

        let mut req = request("r1", "with files", Utc::now());
        req.attachments = vec![attachment("f-2"), attachment("f-1")];

        let stored = repo.create(&req).await.unwrap();

        assert!(!stored.public_id.is_empty());
        assert_eq!(stored.room_id, "r1");
        assert_eq!(stored.sender_name, "Alice");
        assert_eq!(stored.text, "with files");
        let files: Vec<_> = stored.attachments.iter().map(|a| a.file_id.as_str()).collect();
        assert_eq!(files, vec!["f-2", "f-1"]);
        assert_eq!(stored.attachments[0].position, 0);
        assert_eq!(stored.attachments[1].message_id, stored.id);
    }

    #[tokio::test]
    async fn create_rejects_empty_room() {
        let (repo, _dir) = setup().await;

        let error = repo.create(&request("", "nope", Utc::now())).await.unwrap_err();
        assert!(matches!(error, DatabaseError::ValidationError(_)));
    }

    #[tokio::test]
    async fn unknown_sender_gets_empty_name() {
        let (repo, _dir) = setup().await;

        let mut req = request("r1", "ghost", Utc::now());
        req.sender_id = "user-missing".to_string();

        let stored = repo.create(&req).await.unwrap();
        assert_eq!(stored.sender_name, "");
    }

    #[tokio::test]
    async fn recent_for_room_returns_newest_first_within_limit() {
        let (repo, _dir) = setup().await;
        let base = Utc::now();

        for i in 0..5 {
            let mut req = request("r1", &format!("m{i}"), base + Duration::milliseconds(i));
            req.attachments = vec![attachment(&format!("f{i}"))];
            repo.create(&req).await.unwrap();
        }
        repo.create(&request("r2", "other room", base)).await.unwrap();

        let recent = repo.recent_for_room("r1", 3).await.unwrap();
        let texts: Vec<_> = recent.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["m4", "m3", "m2"]);
        assert_eq!(recent[0].attachments.len(), 1);
        assert_eq!(recent[0].attachments[0].file_id, "f4");

        assert!(repo.recent_for_room("empty", 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stored_timestamp_round_trips_at_microsecond_precision() {
        let (repo, _dir) = setup().await;

        let stored = repo.create(&request("r1", "hello", Utc::now())).await.unwrap();
        let recent = repo.recent_for_room("r1", 1).await.unwrap();

        assert_eq!(recent, vec![stored.clone()]);
        assert_eq!(stored.created_at.timestamp_subsec_nanos() % 1_000, 0);
    }
}
