use std::sync::Arc;

use anyhow::{Context, Result};
use huddle_auth::Authenticator;
use huddle_chat::{ChatServer, ConnectionSettings, MessageService};
use huddle_config::AppConfig;
use huddle_database::{initialize_database, MessageRepository};
use huddle_files::FileServiceClient;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub mod telemetry {
    use anyhow::Result;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_env_filter(env_filter)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

/// Everything the server needs, wired from one configuration.
pub struct BackendServices {
    pub db_pool: SqlitePool,
    pub authenticator: Authenticator,
    pub messages: MessageRepository,
    pub chat: ChatServer,
    pub connection_settings: ConnectionSettings,
    dispatcher: JoinHandle<()>,
}

impl BackendServices {
    pub async fn initialise(config: &AppConfig) -> Result<Self> {
        let db_pool = initialize_database(&config.database).await?;

        let authenticator = Authenticator::new(db_pool.clone(), &config.auth);

        let files = FileServiceClient::new(&config.files)
            .context("failed to configure file service client")?;
        if config.files.internal_key.is_none() {
            warn!("no file service internal key configured, download url requests are unauthenticated");
        }

        let messages = MessageRepository::new(db_pool.clone());
        let service = MessageService::new(
            Arc::new(messages.clone()),
            Arc::new(files),
            config.chat.history_limit,
        );
        let (chat, dispatcher) = ChatServer::start(service, &config.chat);

        info!(
            files = %config.files.base_url,
            history_limit = config.chat.history_limit,
            outbound_capacity = config.chat.outbound_capacity,
            "chat core ready"
        );

        Ok(Self {
            db_pool,
            authenticator,
            messages,
            chat,
            connection_settings: ConnectionSettings::from(&config.chat),
            dispatcher,
        })
    }

    /// Stop the dispatch server, wait for it to close every room, and release
    /// the database pool.
    pub async fn shutdown(self) -> Result<()> {
        if let Err(error) = self.chat.shutdown().await {
            debug!(%error, "dispatch server already stopped");
        }
        self.dispatcher
            .await
            .context("chat dispatch task failed")?;
        self.db_pool.close().await;

        info!("backend services stopped");
        Ok(())
    }
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
