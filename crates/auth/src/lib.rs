use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use cuid2::CuidConstructor;
use once_cell::sync::Lazy;
use rand::RngCore;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use huddle_config::AuthConfig;
use thiserror::Error;
use tracing::{debug, info};

static CUID: Lazy<CuidConstructor> = Lazy::new(CuidConstructor::new);

// Keeps expiry timestamps inside the four-digit years RFC3339 can round-trip.
const MAX_SESSION_TTL_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

/// Verifies session tokens and yields the identity a chat connection is
/// admitted with.
#[derive(Clone)]
pub struct Authenticator {
    pool: SqlitePool,
    session_ttl: Duration,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("display name must not be empty")]
    InvalidDisplayName,
    #[error("user already exists")]
    UserExists,
    #[error("user not found")]
    UserNotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("session not found")]
    SessionNotFound,
    #[error("session expired")]
    SessionExpired,
    #[error("invalid session token")]
    InvalidSession,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    #[serde(skip_serializing)]
    pub id: i64,
    pub public_id: String,
    pub email: Option<String>,
    pub display_name: String,
}

#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: String,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
}

impl Authenticator {
    pub fn new(pool: SqlitePool, config: &AuthConfig) -> Self {
        let ttl_seconds = config.session_ttl_seconds.min(MAX_SESSION_TTL_SECONDS) as i64;
        let session_ttl = Duration::seconds(ttl_seconds);

        Self { pool, session_ttl }
    }

    pub async fn register_user(
        &self,
        display_name: &str,
        email: Option<&str>,
    ) -> Result<User, AuthError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(AuthError::InvalidDisplayName);
        }

        let mut tx = self.pool.begin().await?;

        if let Some(email) = email {
            let existing = sqlx::query("SELECT id FROM users WHERE email = ?")
                .bind(email)
                .fetch_optional(&mut *tx)
                .await?;

            if existing.is_some() {
                return Err(AuthError::UserExists);
            }
        }

        let now = timestamp(Utc::now());
        let public_id = new_public_id();

        let result = sqlx::query(
            "INSERT INTO users (public_id, email, display_name, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&public_id)
        .bind(email)
        .bind(display_name)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(user = %public_id, "registered user");

        Ok(User {
            id: result.last_insert_rowid(),
            public_id,
            email: email.map(str::to_owned),
            display_name: display_name.to_owned(),
        })
    }

    pub async fn authenticate_token(&self, token: &str) -> Result<(User, AuthSession), AuthError> {
        if token.is_empty() {
            return Err(AuthError::InvalidSession);
        }

        let row = sqlx::query("SELECT user_id, expires_at FROM sessions WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Err(AuthError::SessionNotFound);
        };

        let user_id: i64 = row.try_get("user_id")?;
        let expires_at: String = row.try_get("expires_at")?;

        let expires_at = DateTime::parse_from_rfc3339(&expires_at)
            .map_err(|_| AuthError::InvalidSession)?
            .with_timezone(&Utc);

        if expires_at <= Utc::now() {
            sqlx::query("DELETE FROM sessions WHERE token = ?")
                .bind(token)
                .execute(&self.pool)
                .await?;
            debug!(user_id, "rejected expired session");
            return Err(AuthError::SessionExpired);
        }

        let user = self.fetch_user(user_id).await?;
        let session = AuthSession {
            token: token.to_owned(),
            user_id,
            expires_at,
        };

        Ok((user, session))
    }

    pub async fn issue_session(&self, user_id: i64) -> Result<AuthSession, AuthError> {
        self.fetch_user(user_id).await?;

        let token = self.generate_session_token();
        let now = Utc::now();
        let expires_at = now + self.session_ttl;

        sqlx::query(
            "INSERT INTO sessions (user_id, token, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(&token)
        .bind(timestamp(now))
        .bind(timestamp(expires_at))
        .execute(&self.pool)
        .await?;

        Ok(AuthSession {
            token,
            user_id,
            expires_at,
        })
    }

    pub async fn revoke_session(&self, token: &str) -> Result<(), AuthError> {
        let result = sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::SessionNotFound);
        }

        Ok(())
    }

    async fn fetch_user(&self, id: i64) -> Result<User, AuthError> {
        let row = sqlx::query("SELECT id, public_id, email, display_name FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Err(AuthError::UserNotFound);
        };

        Ok(User {
            id,
            public_id: row.try_get("public_id")?,
            email: row.try_get("email")?,
            display_name: row.try_get("display_name")?,
        })
    }

    fn generate_session_token(&self) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn new_public_id() -> String {
    CUID.create_id()
}
