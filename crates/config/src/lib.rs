use std::path::PathBuf;
use std::time::Duration;

use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "huddle.toml",
    "config/huddle.toml",
    "crates/config/huddle.toml",
    "../huddle.toml",
    "../config/huddle.toml",
];

/// Upper bound for chat keepalive and write deadlines, one day.
pub const MAX_CHAT_TIMEOUT_SECONDS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub chat: ChatConfig,
    pub files: FileServiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub address: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://huddle.db".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "AuthConfig::default_session_ttl")]
    pub session_ttl_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_seconds: Self::default_session_ttl(),
        }
    }
}

impl AuthConfig {
    fn default_session_ttl() -> u64 {
        86_400
    }
}

/// Tuning for the realtime chat core.
///
/// ```
/// use huddle_config::ChatConfig;
///
/// let chat = ChatConfig::default();
/// assert_eq!(chat.outbound_capacity, 256);
/// assert_eq!(chat.history_limit, 50);
/// assert_eq!(chat.ping_period().as_secs(), 54);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "ChatConfig::default_outbound_capacity")]
    pub outbound_capacity: usize,
    #[serde(default = "ChatConfig::default_command_queue_capacity")]
    pub command_queue_capacity: usize,
    #[serde(default = "ChatConfig::default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default = "ChatConfig::default_history_limit")]
    pub history_limit: u32,
    #[serde(default = "ChatConfig::default_write_timeout")]
    pub write_timeout_seconds: u64,
    #[serde(default = "ChatConfig::default_pong_wait")]
    pub pong_wait_seconds: u64,
}

impl ChatConfig {
    const fn default_outbound_capacity() -> usize {
        256
    }

    const fn default_command_queue_capacity() -> usize {
        1024
    }

    const fn default_max_frame_bytes() -> usize {
        4096
    }

    const fn default_history_limit() -> u32 {
        50
    }

    const fn default_write_timeout() -> u64 {
        10
    }

    const fn default_pong_wait() -> u64 {
        60
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_seconds)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_seconds)
    }

    /// Keepalive pings go out at nine tenths of the pong wait so a healthy peer
    /// always answers before its liveness deadline passes.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait() * 9 / 10
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: Self::default_outbound_capacity(),
            command_queue_capacity: Self::default_command_queue_capacity(),
            max_frame_bytes: Self::default_max_frame_bytes(),
            history_limit: Self::default_history_limit(),
            write_timeout_seconds: Self::default_write_timeout(),
            pong_wait_seconds: Self::default_pong_wait(),
        }
    }
}

/// Connection settings for the external file-storage service that issues
/// time-limited download URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileServiceConfig {
    #[serde(default = "FileServiceConfig::default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub internal_key: Option<String>,
    #[serde(default = "FileServiceConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl FileServiceConfig {
    fn default_base_url() -> String {
        "http://127.0.0.1:9090".to_string()
    }

    const fn default_request_timeout() -> u64 {
        5
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for FileServiceConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            internal_key: None,
            request_timeout_seconds: Self::default_request_timeout(),
        }
    }
}

impl AppConfig {
    /// Reject settings the chat core cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.chat.outbound_capacity > 0, "chat.outbound_capacity must be positive");
        ensure!(
            self.chat.command_queue_capacity > 0,
            "chat.command_queue_capacity must be positive"
        );
        ensure!(self.chat.max_frame_bytes > 0, "chat.max_frame_bytes must be positive");
        ensure!(
            self.chat.write_timeout_seconds > 0,
            "chat.write_timeout_seconds must be positive"
        );
        ensure!(self.chat.pong_wait_seconds > 0, "chat.pong_wait_seconds must be positive");
        ensure!(
            self.chat.write_timeout_seconds <= MAX_CHAT_TIMEOUT_SECONDS,
            "chat.write_timeout_seconds must not exceed {MAX_CHAT_TIMEOUT_SECONDS}"
        );
        ensure!(
            self.chat.pong_wait_seconds <= MAX_CHAT_TIMEOUT_SECONDS,
            "chat.pong_wait_seconds must not exceed {MAX_CHAT_TIMEOUT_SECONDS}"
        );
        // A joiner's whole history replay has to fit in its outbound buffer.
        ensure!(
            self.chat.outbound_capacity >= self.chat.history_limit as usize,
            "chat.outbound_capacity ({}) must be at least chat.history_limit ({})",
            self.chat.outbound_capacity,
            self.chat.history_limit
        );
        ensure!(
            self.files.request_timeout_seconds > 0,
            "files.request_timeout_seconds must be positive"
        );
        ensure!(self.database.max_connections > 0, "database.max_connections must be positive");
        Ok(())
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Load the application configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use huddle_config::load;
///
/// std::env::remove_var("HUDDLE_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.http.address.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let builder = config::Config::builder()
        .set_default("http.address", defaults.http.address.clone())?
        .set_default("http.port", i64::from(defaults.http.port))?
        .set_default("database.url", defaults.database.url.clone())?
        .set_default("database.max_connections", i64::from(defaults.database.max_connections))?
        .set_default("auth.session_ttl_seconds", to_i64(defaults.auth.session_ttl_seconds))?
        .set_default("chat.outbound_capacity", to_i64(defaults.chat.outbound_capacity as u64))?
        .set_default(
            "chat.command_queue_capacity",
            to_i64(defaults.chat.command_queue_capacity as u64),
        )?
        .set_default("chat.max_frame_bytes", to_i64(defaults.chat.max_frame_bytes as u64))?
        .set_default("chat.history_limit", i64::from(defaults.chat.history_limit))?
        .set_default("chat.write_timeout_seconds", to_i64(defaults.chat.write_timeout_seconds))?
        .set_default("chat.pong_wait_seconds", to_i64(defaults.chat.pong_wait_seconds))?
        .set_default("files.base_url", defaults.files.base_url.clone())?
        .set_default(
            "files.request_timeout_seconds",
            to_i64(defaults.files.request_timeout_seconds),
        )?;

    let mut builder = builder;
    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("HUDDLE_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via HUDDLE_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(config::Environment::with_prefix("HUDDLE").separator("__"));

    let cfg = builder.build().context("unable to build configuration")?;

    let mut config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    if config.auth.session_ttl_seconds > i64::MAX as u64 {
        config.auth.session_ttl_seconds = i64::MAX as u64;
    }

    config.validate().context("invalid configuration")?;

    debug!(?config, "loaded huddle configuration");
    Ok(config)
}
