use anyhow::Context;
use clap::{Parser, Subcommand};
use huddle_config::load as load_config;
use huddle_database::format_timestamp;
use huddle_gateway::{create_router, GatewayState};
use huddle_runtime::{shutdown_signal, telemetry, BackendServices};
use tokio::net::TcpListener;
use tracing::info;

const TEXT_PREVIEW_CHARS: usize = 60;

#[derive(Parser)]
#[command(name = "huddle")]
#[command(about = "Huddle group-chat server (serves by default)")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP and websocket server
    Serve,
    /// Print the stored history of a room, oldest first
    History {
        room: String,
        /// Number of most recent messages to print
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Register a user and print a session token for it
    IssueToken {
        display_name: String,
        #[arg(long)]
        email: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing().context("failed to initialise tracing")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server().await,
        Commands::History { room, limit } => dump_history(&room, limit).await,
        Commands::IssueToken {
            display_name,
            email,
        } => issue_token(&display_name, email.as_deref()).await,
    }
}

async fn run_server() -> anyhow::Result<()> {
    info!("starting Huddle server");

    let config = load_config().context("failed to load configuration")?;

    let services = BackendServices::initialise(&config)
        .await
        .context("failed to initialise backend services")?;

    let state = GatewayState::new(
        services.authenticator.clone(),
        services.chat.clone(),
        services.connection_settings,
    );
    let app = create_router(state);

    let address = format!("{}:{}", config.http.address, config.http.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind http listener on {address}"))?;

    info!(%address, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server error")?;

    services
        .shutdown()
        .await
        .context("failed to stop backend services")?;

    info!("server shut down");
    Ok(())
}

async fn dump_history(room: &str, limit: Option<u32>) -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;

    let services = BackendServices::initialise(&config)
        .await
        .context("failed to initialise backend services")?;

    let limit = limit.unwrap_or(config.chat.history_limit);
    let mut messages = services
        .messages
        .recent_for_room(room, limit)
        .await
        .with_context(|| format!("failed to fetch history for room {room}"))?;
    messages.reverse();

    println!("=== ROOM {room} ===");
    if messages.is_empty() {
        println!("No messages found in room");
    } else {
        println!("Showing {} messages:", messages.len());
        println!(
            "{:<28} {:<26} {:<20} {:<5} {}",
            "Timestamp", "Message ID", "Sender", "Files", "Text"
        );
        println!("{}", "-".repeat(140));

        for message in &messages {
            let sender = if message.sender_name.is_empty() {
                message.sender_id.as_str()
            } else {
                message.sender_name.as_str()
            };

            println!(
                "{:<28} {:<26} {:<20} {:<5} {}",
                format_timestamp(&message.created_at),
                message.public_id,
                sender,
                message.attachments.len(),
                preview(&message.text)
            );
        }
    }

    services.shutdown().await?;
    Ok(())
}

async fn issue_token(display_name: &str, email: Option<&str>) -> anyhow::Result<()> {
    let config = load_config().context("failed to load configuration")?;

    let services = BackendServices::initialise(&config)
        .await
        .context("failed to initialise backend services")?;

    let user = services
        .authenticator
        .register_user(display_name, email)
        .await
        .context("failed to register user")?;
    let session = services
        .authenticator
        .issue_session(user.id)
        .await
        .context("failed to issue session")?;

    println!("user id:    {}", user.public_id);
    println!("name:       {}", user.display_name);
    println!("token:      {}", session.token);
    println!("expires at: {}", format_timestamp(&session.expires_at));

    services.shutdown().await?;
    Ok(())
}

fn preview(text: &str) -> String {
    if text.chars().count() > TEXT_PREVIEW_CHARS {
        let head: String = text.chars().take(TEXT_PREVIEW_CHARS - 3).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}
