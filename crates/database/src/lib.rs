//! Huddle Database Crate
//!
//! Connection management, embedded migrations and the repositories that make up
//! the chat persistence gateway: messages are appended together with their
//! attachments and read back newest-first per room.

use sqlx::SqlitePool;
use huddle_config::DatabaseConfig;

pub mod connection;
pub mod entities;
pub mod migrations;
pub mod repos;
pub mod types;

pub use connection::{prepare_database, DatabaseConnection};
pub use migrations::run_migrations;

pub use repos::{AttachmentRepository, MessageRepository};

pub use entities::{
    attachment::{CreateAttachmentRequest, MessageAttachment},
    message::{format_timestamp, parse_timestamp, ChatMessage, CreateMessageRequest},
};

pub use types::{errors::DatabaseError, DatabaseResult};

/// Re-export commonly used types for convenience
pub use sqlx::Pool;

/// Initialize the database with migrations
pub async fn initialize_database(config: &DatabaseConfig) -> DatabaseResult<SqlitePool> {
    let pool = prepare_database(config)
        .await
        .map_err(|e| DatabaseError::ConnectionError(format!("{e:#}")))?;

    run_migrations(&pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("{e:#}")))?;

    Ok(pool)
}
