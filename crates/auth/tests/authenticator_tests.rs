use std::collections::HashSet;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{Duration, SecondsFormat, Utc};
use huddle_auth::{AuthError, Authenticator};
use huddle_config::{AuthConfig, DatabaseConfig};
use sqlx::SqlitePool;
use tempfile::TempDir;

type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

fn auth_config(ttl: u64) -> AuthConfig {
    AuthConfig {
        session_ttl_seconds: ttl,
    }
}

struct TestContext {
    pool: SqlitePool,
    authenticator: Authenticator,
    _temp_dir: TempDir,
}

impl TestContext {
    async fn new(config: AuthConfig) -> TestResult<Self> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("auth.sqlite");
        let database = DatabaseConfig {
            url: format!("sqlite://{}", db_path.display()),
            max_connections: 5,
        };

        let pool = huddle_database::initialize_database(&database).await?;
        let authenticator = Authenticator::new(pool.clone(), &config);

        Ok(Self {
            pool,
            authenticator,
            _temp_dir: temp_dir,
        })
    }

    async fn new_default() -> TestResult<Self> {
        Self::new(auth_config(3_600)).await
    }

    fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }
}

#[tokio::test]
async fn register_user_persists_display_name_and_public_id() -> TestResult {
    let ctx = TestContext::new_default().await?;

    let user = ctx
        .authenticator()
        .register_user("  Alice  ", Some("alice@example.com"))
        .await?;

    assert_eq!(user.display_name, "Alice");
    assert!(!user.public_id.is_empty());

    let stored: String = sqlx::query_scalar("SELECT display_name FROM users WHERE public_id = ?")
        .bind(&user.public_id)
        .fetch_one(ctx.pool())
        .await?;
    assert_eq!(stored, "Alice");

    Ok(())
}

#[tokio::test]
async fn register_user_rejects_duplicate_email_and_blank_names() -> TestResult {
    let ctx = TestContext::new_default().await?;

    ctx.authenticator()
        .register_user("Alice", Some("alice@example.com"))
        .await?;

    let duplicate = ctx
        .authenticator()
        .register_user("Other Alice", Some("alice@example.com"))
        .await;
    assert!(matches!(duplicate, Err(AuthError::UserExists)));

    let blank = ctx.authenticator().register_user("   ", None).await;
    assert!(matches!(blank, Err(AuthError::InvalidDisplayName)));

    Ok(())
}

#[tokio::test]
async fn issued_session_authenticates_to_its_user() -> TestResult {
    let ctx = TestContext::new_default().await?;

    let user = ctx.authenticator().register_user("Bob", None).await?;
    let session = ctx.authenticator().issue_session(user.id).await?;

    let decoded = URL_SAFE_NO_PAD.decode(session.token.as_bytes())?;
    assert_eq!(decoded.len(), 32);

    let ttl = session.expires_at - Utc::now();
    assert!(ttl <= Duration::seconds(3_600));
    assert!(ttl > Duration::seconds(3_500));

    let (authenticated, verified) = ctx
        .authenticator()
        .authenticate_token(&session.token)
        .await?;

    assert_eq!(authenticated.id, user.id);
    assert_eq!(authenticated.public_id, user.public_id);
    assert_eq!(authenticated.display_name, "Bob");
    assert_eq!(verified.user_id, user.id);

    Ok(())
}

#[tokio::test]
async fn issue_session_requires_existing_user() -> TestResult {
    let ctx = TestContext::new_default().await?;

    let result = ctx.authenticator().issue_session(404).await;
    assert!(matches!(result, Err(AuthError::UserNotFound)));

    Ok(())
}

#[tokio::test]
async fn session_tokens_are_unique() -> TestResult {
    let ctx = TestContext::new_default().await?;
    let user = ctx.authenticator().register_user("Carol", None).await?;

    let mut tokens = HashSet::new();
    for _ in 0..10 {
        let session = ctx.authenticator().issue_session(user.id).await?;
        assert!(tokens.insert(session.token));
    }

    Ok(())
}

#[tokio::test]
async fn authenticate_token_rejects_unknown_and_empty_tokens() -> TestResult {
    let ctx = TestContext::new_default().await?;

    let unknown = ctx.authenticator().authenticate_token("does-not-exist").await;
    assert!(matches!(unknown, Err(AuthError::SessionNotFound)));

    let empty = ctx.authenticator().authenticate_token("").await;
    assert!(matches!(empty, Err(AuthError::InvalidSession)));

    Ok(())
}

#[tokio::test]
async fn expired_session_is_rejected_and_deleted() -> TestResult {
    let ctx = TestContext::new_default().await?;
    let user = ctx.authenticator().register_user("Dave", None).await?;

    let past = (Utc::now() - Duration::minutes(5)).to_rfc3339_opts(SecondsFormat::Micros, true);
    sqlx::query(
        "INSERT INTO sessions (user_id, token, created_at, expires_at) VALUES (?, 'stale', ?, ?)",
    )
    .bind(user.id)
    .bind(&past)
    .bind(&past)
    .execute(ctx.pool())
    .await?;

    let result = ctx.authenticator().authenticate_token("stale").await;
    assert!(matches!(result, Err(AuthError::SessionExpired)));

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE token = 'stale'")
        .fetch_one(ctx.pool())
        .await?;
    assert_eq!(remaining, 0);

    Ok(())
}

#[tokio::test]
async fn zero_ttl_sessions_expire_immediately() -> TestResult {
    let ctx = TestContext::new(auth_config(0)).await?;
    let user = ctx.authenticator().register_user("Erin", None).await?;

    let session = ctx.authenticator().issue_session(user.id).await?;
    let result = ctx.authenticator().authenticate_token(&session.token).await;
    assert!(matches!(result, Err(AuthError::SessionExpired)));

    Ok(())
}

#[tokio::test]
async fn oversized_ttl_is_capped_to_a_storable_expiry() -> TestResult {
    let ctx = TestContext::new(auth_config(i64::MAX as u64)).await?;
    let user = ctx.authenticator().register_user("Frank", None).await?;

    let session = ctx.authenticator().issue_session(user.id).await?;
    ctx.authenticator().authenticate_token(&session.token).await?;

    Ok(())
}

#[tokio::test]
async fn revoked_session_no_longer_authenticates() -> TestResult {
    let ctx = TestContext::new_default().await?;
    let user = ctx.authenticator().register_user("Grace", None).await?;
    let session = ctx.authenticator().issue_session(user.id).await?;

    ctx.authenticator().revoke_session(&session.token).await?;

    let result = ctx.authenticator().authenticate_token(&session.token).await;
    assert!(matches!(result, Err(AuthError::SessionNotFound)));

    let again = ctx.authenticator().revoke_session(&session.token).await;
    assert!(matches!(again, Err(AuthError::SessionNotFound)));

    Ok(())
}
