//! Socket-facing read and write loops.
//!
//! Both loops are generic over a frame [`Stream`]/[`Sink`] so the websocket
//! gateway and the tests drive the same code.

use std::fmt::Display;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use huddle_config::ChatConfig;
use tokio::task::JoinError;
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{ConnectionHandle, ConnectionId, Outbound, OutboundQueue};
use crate::server::ChatServer;
use crate::types::{ChatResult, ConnectionError, InboundFrame};

/// Transport-neutral websocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Limits and timers for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub max_frame_bytes: usize,
    pub write_timeout: Duration,
    pub pong_wait: Duration,
    pub ping_period: Duration,
}

impl From<&ChatConfig> for ConnectionSettings {
    fn from(config: &ChatConfig) -> Self {
        Self {
            max_frame_bytes: config.max_frame_bytes,
            write_timeout: config.write_timeout(),
            pong_wait: config.pong_wait(),
            ping_period: config.ping_period(),
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&ChatConfig::default())
    }
}

/// Decode client frames and hand them to the dispatch server.
///
/// Malformed frames are logged and skipped. The loop ends on a close frame,
/// the end of the stream, a transport error, an oversized frame, or when no
/// pong arrived within `pong_wait`.
pub async fn read_loop<S, E>(
    mut stream: S,
    origin: ConnectionId,
    server: ChatServer,
    settings: ConnectionSettings,
) -> Result<(), ConnectionError>
where
    S: Stream<Item = Result<WireFrame, E>> + Unpin,
    E: Display + Send,
{
    let mut deadline = Instant::now() + settings.pong_wait;

    loop {
        let frame = match timeout_at(deadline, stream.next()).await {
            Err(_) => return Err(ConnectionError::LivenessTimeout),
            Ok(None) => return Ok(()),
            Ok(Some(Err(error))) => return Err(ConnectionError::Transport(error.to_string())),
            Ok(Some(Ok(frame))) => frame,
        };

        let payload = match frame {
            WireFrame::Pong(_) => {
                deadline = Instant::now() + settings.pong_wait;
                continue;
            }
            WireFrame::Ping(_) => continue,
            WireFrame::Close => return Ok(()),
            WireFrame::Text(text) => text.into_bytes(),
            WireFrame::Binary(bytes) => bytes,
        };

        if payload.len() > settings.max_frame_bytes {
            return Err(ConnectionError::FrameTooLarge {
                size: payload.len(),
                limit: settings.max_frame_bytes,
            });
        }

        match serde_json::from_slice::<InboundFrame>(&payload) {
            Ok(frame) => server.submit(origin, frame).await?,
            Err(error) => {
                warn!(connection_id = %origin, %error, "invalid client message");
            }
        }
    }
}

/// Drain the outbound buffer to the socket and keep the peer alive with pings.
///
/// Once the buffer is closed, frames still queued are flushed and a close
/// frame is sent. Any write that misses the write deadline ends the loop.
pub async fn write_loop<S>(
    mut sink: S,
    mut queue: OutboundQueue,
    settings: ConnectionSettings,
) -> Result<(), ConnectionError>
where
    S: Sink<WireFrame> + Unpin,
    S::Error: Display,
{
    let mut ping = interval_at(Instant::now() + settings.ping_period, settings.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            outbound = queue.next() => match outbound {
                Outbound::Frame(payload) => {
                    send_frame(&mut sink, WireFrame::Text(payload.to_string()), settings.write_timeout).await?;
                }
                Outbound::Closed => {
                    for payload in queue.drain() {
                        send_frame(&mut sink, WireFrame::Text(payload.to_string()), settings.write_timeout).await?;
                    }
                    send_frame(&mut sink, WireFrame::Close, settings.write_timeout).await?;
                    return Ok(());
                }
            },
            _ = ping.tick() => {
                send_frame(&mut sink, WireFrame::Ping(Vec::new()), settings.write_timeout).await?;
            }
        }
    }
}

async fn send_frame<S>(sink: &mut S, frame: WireFrame, deadline: Duration) -> Result<(), ConnectionError>
where
    S: Sink<WireFrame> + Unpin,
    S::Error: Display,
{
    match timeout(deadline, sink.send(frame)).await {
        Err(_) => Err(ConnectionError::WriteTimeout),
        Ok(Err(error)) => Err(ConnectionError::Transport(error.to_string())),
        Ok(Ok(())) => Ok(()),
    }
}

/// Run a connection from admission to dismissal.
///
/// When the read loop ends the connection is dismissed, which closes its
/// buffer and lets the write loop flush and finish. When the write loop ends
/// first the read loop is cancelled.
pub async fn serve_connection<Si, St, E>(
    server: ChatServer,
    handle: ConnectionHandle,
    queue: OutboundQueue,
    sink: Si,
    stream: St,
    settings: ConnectionSettings,
) -> ChatResult<()>
where
    Si: Sink<WireFrame> + Unpin + Send + 'static,
    Si::Error: Display,
    St: Stream<Item = Result<WireFrame, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let id = handle.id();
    server.admit(handle.clone()).await?;
    info!(connection_id = %id, user_id = %handle.identity().user_id, "client connected");

    let mut writer = tokio::spawn(write_loop(sink, queue, settings));
    let mut reader = tokio::spawn(read_loop(stream, id, server.clone(), settings));

    tokio::select! {
        result = &mut reader => {
            log_loop_exit("read", id, result);
            dismiss(&server, &handle).await;
            match timeout(settings.write_timeout, &mut writer).await {
                Ok(result) => log_loop_exit("write", id, result),
                Err(_) => writer.abort(),
            }
        }
        result = &mut writer => {
            log_loop_exit("write", id, result);
            reader.abort();
            dismiss(&server, &handle).await;
        }
    }

    info!(connection_id = %id, "client disconnected");
    Ok(())
}

async fn dismiss(server: &ChatServer, handle: &ConnectionHandle) {
    if let Err(error) = server.dismiss(handle.id()).await {
        debug!(connection_id = %handle.id(), %error, "dismiss after server shutdown");
    }
    handle.close();
}

fn log_loop_exit(
    loop_name: &'static str,
    id: ConnectionId,
    result: Result<Result<(), ConnectionError>, JoinError>,
) {
    match result {
        Ok(Ok(())) => debug!(connection_id = %id, loop_name, "loop finished"),
        Ok(Err(error)) => info!(connection_id = %id, loop_name, %error, "loop terminated"),
        Err(error) if error.is_cancelled() => debug!(connection_id = %id, loop_name, "loop cancelled"),
        Err(error) => warn!(connection_id = %id, loop_name, %error, "loop panicked"),
    }
}
