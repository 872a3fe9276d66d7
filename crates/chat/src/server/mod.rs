//! The dispatch server: owner of the room registry and the connection set.
//!
//! Every admission, dismissal and client frame goes through one bounded
//! command queue consumed by a single task, so registry changes never race.
//! The dispatcher itself never touches storage; it routes each command to the
//! room's [`Hub`], which does the persistence and fan-out for that room only.

mod hub;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use huddle_config::ChatConfig;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use self::hub::{Hub, HubMessage};
use crate::connection::{ConnectionHandle, ConnectionId, Identity, OutboundQueue};
use crate::services::MessageService;
use crate::types::{AttachmentRef, ChatError, ChatResult, InboundFrame};

/// Commands consumed by the dispatch loop, in submission order.
#[derive(Debug)]
pub enum Command {
    Admit(ConnectionHandle),
    Dismiss(ConnectionId),
    Join {
        origin: ConnectionId,
        room: String,
    },
    Leave {
        origin: ConnectionId,
        room: String,
    },
    Broadcast {
        origin: ConnectionId,
        room: String,
        text: String,
        attachments: Vec<AttachmentRef>,
    },
    Shutdown,
}

impl Command {
    /// Tag a decoded client frame with the connection it arrived on.
    pub fn from_frame(origin: ConnectionId, frame: InboundFrame) -> Self {
        match frame {
            InboundFrame::Join { room } => Command::Join { origin, room },
            InboundFrame::Leave { room } => Command::Leave { origin, room },
            InboundFrame::Broadcast {
                room,
                text,
                attachments,
            } => Command::Broadcast {
                origin,
                room,
                text,
                attachments,
            },
        }
    }
}

/// Requests hubs send back to the dispatcher.
pub(crate) enum Control {
    /// The hub's member set became empty after `registrations_seen`
    /// registrations.
    Teardown {
        room: String,
        hub_id: u64,
        registrations_seen: u64,
    },
}

struct HubEntry {
    id: u64,
    inbox: mpsc::UnboundedSender<HubMessage>,
    /// Registrations sent to this hub so far.
    registrations: u64,
}

type Registry = Arc<Mutex<HashMap<String, HubEntry>>>;

/// Cloneable handle to the running dispatch server.
#[derive(Clone)]
pub struct ChatServer {
    commands: mpsc::Sender<Command>,
    registry: Registry,
    connections: Arc<AtomicUsize>,
    outbound_capacity: usize,
}

impl ChatServer {
    /// Spawn the dispatch loop.
    pub fn start(service: MessageService, config: &ChatConfig) -> (Self, JoinHandle<()>) {
        let (commands, command_rx) = mpsc::channel(config.command_queue_capacity.max(1));
        let (control, control_rx) = mpsc::unbounded_channel();
        let registry = Registry::default();
        let connections = Arc::new(AtomicUsize::new(0));

        let dispatcher = Dispatcher {
            service,
            registry: registry.clone(),
            clients: HashMap::new(),
            connection_count: connections.clone(),
            control,
            backlog_limit: config.outbound_capacity,
            next_hub_id: 0,
        };
        let task = tokio::spawn(dispatcher.run(command_rx, control_rx));

        let server = Self {
            commands,
            registry,
            connections,
            outbound_capacity: config.outbound_capacity,
        };

        (server, task)
    }

    /// Create a connection whose outbound buffer has the configured capacity.
    pub fn open_connection(&self, identity: Identity) -> (ConnectionHandle, OutboundQueue) {
        ConnectionHandle::new(identity, self.outbound_capacity)
    }

    pub async fn admit(&self, handle: ConnectionHandle) -> ChatResult<()> {
        self.send(Command::Admit(handle)).await
    }

    pub async fn dismiss(&self, connection: ConnectionId) -> ChatResult<()> {
        self.send(Command::Dismiss(connection)).await
    }

    /// Enqueue a client frame on behalf of `origin`.
    pub async fn submit(&self, origin: ConnectionId, frame: InboundFrame) -> ChatResult<()> {
        self.send(Command::from_frame(origin, frame)).await
    }

    /// Stop every hub, close every connection and end the dispatch loop.
    pub async fn shutdown(&self) -> ChatResult<()> {
        self.send(Command::Shutdown).await
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    pub fn active_connections(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    /// Rooms that currently have a hub, sorted.
    pub async fn active_rooms(&self) -> Vec<String> {
        let registry = self.registry.lock().await;
        let mut rooms: Vec<String> = registry.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Ask a room's hub how many members it has; `None` when no hub exists.
    pub async fn room_member_count(&self, room: &str) -> Option<usize> {
        let inbox = {
            let registry = self.registry.lock().await;
            registry.get(room)?.inbox.clone()
        };

        let (reply, response) = oneshot::channel();
        inbox.send(HubMessage::MemberCount(reply)).ok()?;
        response.await.ok()
    }

    async fn send(&self, command: Command) -> ChatResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ChatError::ServerClosed)
    }
}

struct Client {
    handle: ConnectionHandle,
    rooms: HashSet<String>,
}

struct Dispatcher {
    service: MessageService,
    registry: Registry,
    clients: HashMap<ConnectionId, Client>,
    connection_count: Arc<AtomicUsize>,
    control: mpsc::UnboundedSender<Control>,
    backlog_limit: usize,
    next_hub_id: u64,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut control: mpsc::UnboundedReceiver<Control>,
    ) {
        info!("chat dispatch server started");

        loop {
            tokio::select! {
                biased;
                Some(request) = control.recv() => self.handle_control(request).await,
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
            }
        }

        commands.close();
        self.stop_all().await;
        info!("chat dispatch server stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Admit(handle) => self.admit(handle),
            Command::Dismiss(connection) => self.dismiss(connection).await,
            Command::Join { origin, room } => self.join(origin, room).await,
            Command::Leave { origin, room } => self.leave(origin, room).await,
            Command::Broadcast {
                origin,
                room,
                text,
                attachments,
            } => self.broadcast(origin, room, text, attachments).await,
            Command::Shutdown => {}
        }
    }

    fn admit(&mut self, handle: ConnectionHandle) {
        let connection = handle.id();
        self.clients.insert(
            connection,
            Client {
                handle,
                rooms: HashSet::new(),
            },
        );
        self.publish_connection_count();
        debug!(connection_id = %connection, connections = self.clients.len(), "connection admitted");
    }

    async fn dismiss(&mut self, connection: ConnectionId) {
        let Some(client) = self.clients.remove(&connection) else {
            return;
        };

        for room in &client.rooms {
            self.send_to_hub(room, HubMessage::Unregister(connection)).await;
        }
        client.handle.close();
        self.publish_connection_count();
        debug!(connection_id = %connection, rooms = client.rooms.len(), "connection dismissed");
    }

    async fn join(&mut self, origin: ConnectionId, room: String) {
        if room.is_empty() {
            warn!(connection_id = %origin, "ignoring join without a room id");
            return;
        }

        let Some(client) = self.clients.get_mut(&origin) else {
            debug!(connection_id = %origin, room_id = %room, "ignoring join from unknown connection");
            return;
        };
        if !client.rooms.insert(room.clone()) {
            debug!(connection_id = %origin, room_id = %room, "connection already in room");
            return;
        }
        let handle = client.handle.clone();

        let registry = self.registry.clone();
        let mut registry = registry.lock().await;
        let entry = match registry.entry(room.clone()) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let id = self.next_hub_id;
                self.next_hub_id += 1;
                let inbox = Hub::spawn(
                    room.clone(),
                    id,
                    self.service.clone(),
                    self.control.clone(),
                    self.backlog_limit,
                );
                info!(room_id = %room, hub_id = id, "room hub created");
                entry.insert(HubEntry {
                    id,
                    inbox,
                    registrations: 0,
                })
            }
        };

        entry.registrations += 1;
        if entry.inbox.send(HubMessage::Register(handle)).is_err() {
            error!(room_id = %room, hub_id = entry.id, "registered hub is not running");
        }
    }

    async fn leave(&mut self, origin: ConnectionId, room: String) {
        let left = self
            .clients
            .get_mut(&origin)
            .is_some_and(|client| client.rooms.remove(&room));

        if left {
            self.send_to_hub(&room, HubMessage::Unregister(origin)).await;
        }
    }

    async fn broadcast(
        &mut self,
        origin: ConnectionId,
        room: String,
        text: String,
        attachments: Vec<AttachmentRef>,
    ) {
        let joined = self
            .clients
            .get(&origin)
            .is_some_and(|client| client.rooms.contains(&room));

        if !joined {
            debug!(connection_id = %origin, room_id = %room, "ignoring broadcast to a room not joined");
            return;
        }

        self.send_to_hub(
            &room,
            HubMessage::Broadcast {
                origin,
                text,
                attachments,
            },
        )
        .await;
    }

    async fn handle_control(&mut self, request: Control) {
        match request {
            Control::Teardown {
                room,
                hub_id,
                registrations_seen,
            } => {
                let mut registry = self.registry.lock().await;
                let current = registry
                    .get(&room)
                    .is_some_and(|entry| entry.id == hub_id && entry.registrations == registrations_seen);

                if !current {
                    debug!(room_id = %room, hub_id, "ignoring stale teardown request");
                    return;
                }

                if let Some(entry) = registry.remove(&room) {
                    let _ = entry.inbox.send(HubMessage::Stop);
                    info!(room_id = %room, hub_id, "room hub torn down");
                }
            }
        }
    }

    async fn send_to_hub(&self, room: &str, message: HubMessage) {
        let registry = self.registry.lock().await;
        match registry.get(room) {
            Some(entry) => {
                if entry.inbox.send(message).is_err() {
                    error!(room_id = %room, hub_id = entry.id, "registered hub is not running");
                }
            }
            None => debug!(room_id = %room, "no hub for room"),
        }
    }

    async fn stop_all(&mut self) {
        let hubs: Vec<(String, HubEntry)> = self.registry.lock().await.drain().collect();
        for (room, entry) in hubs {
            let _ = entry.inbox.send(HubMessage::Stop);
            debug!(room_id = %room, hub_id = entry.id, "room hub stopped for shutdown");
        }

        for (_, client) in self.clients.drain() {
            client.handle.close();
        }
        self.publish_connection_count();
    }

    fn publish_connection_count(&self) {
        self.connection_count.store(self.clients.len(), Ordering::Release);
    }
}
