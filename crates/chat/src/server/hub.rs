//! Per-room broadcaster.
//!
//! A hub owns its member set outright: registrations, departures, broadcasts
//! and replay completions all arrive as [`HubMessage`]s and are applied one at
//! a time by [`Hub::run`]. Broadcasts are persisted, rendered and fanned out
//! inside that loop, so members of one room see messages in the order the hub
//! accepted them and only the members present at that moment receive them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::Control;
use crate::connection::{ConnectionHandle, ConnectionId};
use crate::services::MessageService;
use crate::types::{AttachmentRef, DeliveryError};

pub(crate) enum HubMessage {
    Register(ConnectionHandle),
    Unregister(ConnectionId),
    Broadcast {
        origin: ConnectionId,
        text: String,
        attachments: Vec<AttachmentRef>,
    },
    ReplayFinished {
        connection: ConnectionId,
        replay: u64,
        history: Vec<(String, Arc<str>)>,
    },
    MemberCount(oneshot::Sender<usize>),
    Stop,
}

struct Member {
    handle: ConnectionHandle,
    /// Set while history is being replayed; live payloads wait here.
    pending: Option<PendingReplay>,
}

struct PendingReplay {
    id: u64,
    backlog: Vec<(String, Arc<str>)>,
}

pub(crate) struct Hub {
    room: String,
    id: u64,
    members: HashMap<ConnectionId, Member>,
    registrations: u64,
    teardown_requested: Option<u64>,
    next_replay: u64,
    backlog_limit: usize,
    last_timestamp: Option<DateTime<Utc>>,
    service: MessageService,
    inbox: mpsc::UnboundedReceiver<HubMessage>,
    mailbox: mpsc::UnboundedSender<HubMessage>,
    control: mpsc::UnboundedSender<Control>,
}

impl Hub {
    /// Start the hub task for `room` and return its inbox.
    pub(crate) fn spawn(
        room: String,
        id: u64,
        service: MessageService,
        control: mpsc::UnboundedSender<Control>,
        backlog_limit: usize,
    ) -> mpsc::UnboundedSender<HubMessage> {
        let (mailbox, inbox) = mpsc::unbounded_channel();
        let hub = Hub {
            room,
            id,
            members: HashMap::new(),
            registrations: 0,
            teardown_requested: None,
            next_replay: 0,
            backlog_limit: backlog_limit.max(1),
            last_timestamp: None,
            service,
            inbox,
            mailbox: mailbox.clone(),
            control,
        };

        tokio::spawn(hub.run());
        mailbox
    }

    async fn run(mut self) {
        info!(room_id = %self.room, hub_id = self.id, "hub started");

        while let Some(message) = self.inbox.recv().await {
            match message {
                HubMessage::Register(handle) => self.register(handle),
                HubMessage::Unregister(connection) => {
                    if self.members.remove(&connection).is_some() {
                        debug!(room_id = %self.room, connection_id = %connection, members = self.members.len(), "member left");
                        self.request_teardown_if_empty();
                    }
                }
                HubMessage::Broadcast {
                    origin,
                    text,
                    attachments,
                } => self.broadcast(origin, text, attachments).await,
                HubMessage::ReplayFinished {
                    connection,
                    replay,
                    history,
                } => self.finish_replay(connection, replay, history),
                HubMessage::MemberCount(reply) => {
                    let _ = reply.send(self.members.len());
                }
                HubMessage::Stop => {
                    self.stop();
                    break;
                }
            }
        }

        info!(room_id = %self.room, hub_id = self.id, "hub stopped");
    }

    fn register(&mut self, handle: ConnectionHandle) {
        self.registrations += 1;
        let replay = self.next_replay;
        self.next_replay += 1;

        let connection = handle.id();
        self.members.insert(
            connection,
            Member {
                handle,
                pending: Some(PendingReplay {
                    id: replay,
                    backlog: Vec::new(),
                }),
            },
        );
        debug!(room_id = %self.room, connection_id = %connection, members = self.members.len(), "member joined");

        tokio::spawn(replay_history(
            self.service.clone(),
            self.room.clone(),
            connection,
            replay,
            self.mailbox.clone(),
        ));
    }

    async fn broadcast(&mut self, origin: ConnectionId, text: String, attachments: Vec<AttachmentRef>) {
        let Some(sender) = self
            .members
            .get(&origin)
            .map(|member| member.handle.identity().clone())
        else {
            debug!(room_id = %self.room, connection_id = %origin, "ignoring broadcast from non-member");
            return;
        };

        let created_at = self.next_timestamp().await;
        let message = match self
            .service
            .save_message(&self.room, &sender, &text, &attachments, created_at)
            .await
        {
            Ok(message) => message,
            Err(error) => {
                error!(room_id = %self.room, user_id = %sender.user_id, %error, "failed to save message");
                return;
            }
        };
        self.last_timestamp = Some(message.created_at);

        let payload = match self.service.encode(&message).await {
            Ok(payload) => payload,
            Err(error) => {
                error!(room_id = %self.room, message_id = %message.public_id, %error, "failed to encode message");
                return;
            }
        };

        self.fan_out(&message.public_id, payload);
    }

    /// Offer a payload to every member without waiting on any of them.
    fn fan_out(&mut self, message_id: &str, payload: Arc<str>) {
        let mut evicted = Vec::new();
        let mut gone = Vec::new();

        for (connection, member) in self.members.iter_mut() {
            if let Some(pending) = member.pending.as_mut() {
                if pending.backlog.len() >= self.backlog_limit {
                    evicted.push(*connection);
                } else {
                    pending.backlog.push((message_id.to_owned(), payload.clone()));
                }
                continue;
            }

            match member.handle.try_deliver(payload.clone()) {
                Ok(()) => {}
                Err(DeliveryError::Full) => evicted.push(*connection),
                Err(DeliveryError::Closed) => gone.push(*connection),
            }
        }

        for connection in evicted {
            self.evict(connection);
        }
        for connection in gone {
            self.members.remove(&connection);
        }

        debug!(room_id = %self.room, message_id, members = self.members.len(), "message fanned out");
        self.request_teardown_if_empty();
    }

    /// Deliver fetched history, then whatever went live while it was loading.
    ///
    /// The replay only counts if it belongs to the member's current
    /// registration; a member who left (and perhaps rejoined) in the meantime
    /// gets nothing from the stale fetch.
    fn finish_replay(&mut self, connection: ConnectionId, replay: u64, history: Vec<(String, Arc<str>)>) {
        let Some(member) = self.members.get_mut(&connection) else {
            debug!(room_id = %self.room, connection_id = %connection, "dropping history for departed member");
            return;
        };

        let pending = match member.pending.take() {
            Some(pending) if pending.id == replay => pending,
            other => {
                member.pending = other;
                return;
            }
        };
        let handle = member.handle.clone();

        match deliver_replay(&handle, history, pending.backlog) {
            Ok(count) => {
                debug!(room_id = %self.room, connection_id = %connection, count, "history replayed");
                return;
            }
            Err(DeliveryError::Full) => self.evict(connection),
            Err(DeliveryError::Closed) => {
                self.members.remove(&connection);
            }
        }
        self.request_teardown_if_empty();
    }

    fn evict(&mut self, connection: ConnectionId) {
        if let Some(member) = self.members.remove(&connection) {
            member.handle.close();
            warn!(
                room_id = %self.room,
                connection_id = %connection,
                user_id = %member.handle.identity().user_id,
                "evicted slow consumer"
            );
        }
    }

    fn request_teardown_if_empty(&mut self) {
        if !self.members.is_empty() || self.teardown_requested == Some(self.registrations) {
            return;
        }

        self.teardown_requested = Some(self.registrations);
        let request = Control::Teardown {
            room: self.room.clone(),
            hub_id: self.id,
            registrations_seen: self.registrations,
        };
        if self.control.send(request).is_err() {
            debug!(room_id = %self.room, "dispatch server gone before teardown request");
        }
    }

    fn stop(&mut self) {
        for (_, member) in self.members.drain() {
            member.handle.close();
        }
    }

    /// Timestamps within a room strictly increase, even if the clock does not.
    async fn next_timestamp(&mut self) -> DateTime<Utc> {
        if self.last_timestamp.is_none() {
            match self.service.latest_timestamp(&self.room).await {
                Ok(latest) => self.last_timestamp = latest,
                Err(error) => warn!(room_id = %self.room, %error, "failed to load latest timestamp"),
            }
        }

        let now = Utc::now();
        let now = now.with_nanosecond(now.nanosecond() / 1_000 * 1_000).unwrap_or(now);

        match self.last_timestamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        }
    }
}

/// Queue the history, then the backlog entries the history did not already cover.
///
/// Everything up to the newest backlog entry found in the history was either
/// part of it or is older than it, so only the tail goes out.
fn deliver_replay(
    handle: &ConnectionHandle,
    history: Vec<(String, Arc<str>)>,
    backlog: Vec<(String, Arc<str>)>,
) -> Result<usize, DeliveryError> {
    let replayed: HashSet<String> = history.iter().map(|(message_id, _)| message_id.clone()).collect();
    let count = history.len();

    for (_, payload) in history {
        handle.try_deliver(payload)?;
    }

    let start = backlog
        .iter()
        .rposition(|(message_id, _)| replayed.contains(message_id))
        .map_or(0, |index| index + 1);

    for (_, payload) in backlog.into_iter().skip(start) {
        handle.try_deliver(payload)?;
    }
    Ok(count)
}

/// Fetch and encode a room's recent history off the hub loop.
async fn replay_history(
    service: MessageService,
    room: String,
    connection: ConnectionId,
    replay: u64,
    mailbox: mpsc::UnboundedSender<HubMessage>,
) {
    let mut history = Vec::new();

    match service.recent_history(&room).await {
        Ok(messages) => {
            for message in &messages {
                match service.encode(message).await {
                    Ok(payload) => history.push((message.public_id.clone(), payload)),
                    Err(error) => {
                        warn!(room_id = %room, message_id = %message.public_id, %error, "skipping unencodable history entry");
                    }
                }
            }
        }
        Err(error) => {
            warn!(room_id = %room, connection_id = %connection, %error, "failed to fetch chat history");
        }
    }

    let _ = mailbox.send(HubMessage::ReplayFinished {
        connection,
        replay,
        history,
    });
}
