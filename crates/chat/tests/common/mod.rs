//! In-memory collaborators and helpers shared by the chat integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, Stream};
use huddle_chat::{
    AttachmentResolver, ChatServer, ConnectionHandle, Identity, InboundFrame, MessageService,
    MessageStore, Outbound, OutboundFrame, OutboundQueue,
};
use huddle_config::ChatConfig;
use huddle_database::{
    ChatMessage, CreateMessageRequest, DatabaseError, DatabaseResult, MessageAttachment,
};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

pub const WAIT: Duration = Duration::from_secs(3);

/// Message store kept in memory, with switches for injected failures.
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: RwLock<Vec<ChatMessage>>,
    users: RwLock<HashMap<String, String>>,
    write_delays: RwLock<HashMap<String, Duration>>,
    read_delay: RwLock<Option<Duration>>,
    next_id: AtomicI64,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryMessageStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn add_user(&self, user_id: &str, display_name: &str) {
        self.users
            .write()
            .await
            .insert(user_id.to_string(), display_name.to_string());
    }

    pub async fn delay_writes_for(&self, room_id: &str, delay: Duration) {
        self.write_delays
            .write()
            .await
            .insert(room_id.to_string(), delay);
    }

    pub async fn delay_reads(&self, delay: Duration) {
        *self.read_delay.write().await = Some(delay);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub async fn messages_in(&self, room_id: &str) -> Vec<ChatMessage> {
        self.messages
            .read()
            .await
            .iter()
            .filter(|message| message.room_id == room_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create_message(&self, request: CreateMessageRequest) -> DatabaseResult<ChatMessage> {
        let delay = self.write_delays.read().await.get(&request.room_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DatabaseError::QueryError("injected write failure".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let sender_name = self
            .users
            .read()
            .await
            .get(&request.sender_id)
            .cloned()
            .unwrap_or_default();

        let attachments = request
            .attachments
            .iter()
            .enumerate()
            .map(|(position, attachment)| MessageAttachment {
                id: id * 100 + position as i64,
                public_id: format!("att-{id}-{position}"),
                message_id: id,
                position: position as i64,
                file_id: attachment.file_id.clone(),
                file_name: attachment.file_name.clone(),
                file_type: attachment.file_type.clone(),
                file_size: attachment.file_size,
                created_at: huddle_database::format_timestamp(&request.created_at),
            })
            .collect();

        let message = ChatMessage {
            id,
            public_id: format!("msg-{id}"),
            room_id: request.room_id,
            sender_id: request.sender_id,
            sender_name,
            text: request.text,
            created_at: request.created_at,
            attachments,
        };

        self.messages.write().await.push(message.clone());
        Ok(message)
    }

    async fn recent_messages(&self, room_id: &str, limit: u32) -> DatabaseResult<Vec<ChatMessage>> {
        let delay = *self.read_delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DatabaseError::QueryError("injected read failure".to_string()));
        }

        let mut messages = self.messages_in(room_id).await;
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        messages.truncate(limit as usize);
        Ok(messages)
    }
}

/// Resolver that fails for a chosen set of file ids.
#[derive(Default)]
pub struct FlakyResolver {
    failing: HashSet<String>,
}

impl FlakyResolver {
    pub fn failing_for(file_ids: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing: file_ids.iter().map(|id| id.to_string()).collect(),
        })
    }
}

#[async_trait]
impl AttachmentResolver for FlakyResolver {
    async fn download_url(&self, file_id: &str) -> anyhow::Result<String> {
        if self.failing.contains(file_id) {
            anyhow::bail!("file service unavailable for {file_id}");
        }
        Ok(format!("https://files.test/{file_id}"))
    }
}

pub struct Harness {
    pub server: ChatServer,
    pub store: Arc<MemoryMessageStore>,
    pub task: JoinHandle<()>,
}

impl Harness {
    pub fn start() -> Self {
        Self::with(ChatConfig::default(), FlakyResolver::failing_for(&[]))
    }

    pub fn with(config: ChatConfig, resolver: Arc<FlakyResolver>) -> Self {
        let store = MemoryMessageStore::new();
        let service = MessageService::new(store.clone(), resolver, config.history_limit);
        let (server, task) = ChatServer::start(service, &config);
        Self {
            server,
            store,
            task,
        }
    }

    /// Open and admit a connection with the configured buffer size.
    pub async fn connect(&self, user_id: &str, name: &str) -> (ConnectionHandle, OutboundQueue) {
        self.store.add_user(user_id, name).await;
        let (handle, queue) = self.server.open_connection(Identity::new(user_id, name));
        self.server.admit(handle.clone()).await.unwrap();
        (handle, queue)
    }

    /// Open and admit a connection with its own buffer size.
    pub async fn connect_with_capacity(
        &self,
        user_id: &str,
        name: &str,
        capacity: usize,
    ) -> (ConnectionHandle, OutboundQueue) {
        self.store.add_user(user_id, name).await;
        let (handle, queue) = ConnectionHandle::new(Identity::new(user_id, name), capacity);
        self.server.admit(handle.clone()).await.unwrap();
        (handle, queue)
    }

    pub async fn join(&self, handle: &ConnectionHandle, room: &str) {
        self.server
            .submit(handle.id(), InboundFrame::Join { room: room.into() })
            .await
            .unwrap();
    }

    pub async fn leave(&self, handle: &ConnectionHandle, room: &str) {
        self.server
            .submit(handle.id(), InboundFrame::Leave { room: room.into() })
            .await
            .unwrap();
    }

    pub async fn say(&self, handle: &ConnectionHandle, room: &str, text: &str) {
        self.server
            .submit(
                handle.id(),
                InboundFrame::Broadcast {
                    room: room.into(),
                    text: text.into(),
                    attachments: Vec::new(),
                },
            )
            .await
            .unwrap();
    }

    pub async fn wait_for_members(&self, room: &str, expected: Option<usize>) {
        let server = self.server.clone();
        let room = room.to_string();
        eventually(&format!("room {room} to have {expected:?} members"), move || {
            let server = server.clone();
            let room = room.clone();
            async move { server.room_member_count(&room).await == expected }
        })
        .await;
    }
}

/// Poll `check` until it holds or the wait budget runs out.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn next_frame(queue: &mut OutboundQueue) -> OutboundFrame {
    match tokio::time::timeout(WAIT, queue.next()).await {
        Ok(Outbound::Frame(payload)) => serde_json::from_str(&payload).expect("valid outbound json"),
        Ok(Outbound::Closed) => panic!("outbound queue closed while waiting for a frame"),
        Err(_) => panic!("timed out waiting for an outbound frame"),
    }
}

pub async fn expect_silence(queue: &mut OutboundQueue, window: Duration) {
    if let Ok(outbound) = tokio::time::timeout(window, queue.next()).await {
        panic!("expected no outbound traffic, got {outbound:?}");
    }
}

/// Wait for a queue to be closed and return how many frames it held.
pub async fn frames_until_closed(queue: &mut OutboundQueue) -> usize {
    let mut frames = 0;
    loop {
        match tokio::time::timeout(WAIT, queue.next()).await {
            Ok(Outbound::Frame(_)) => frames += 1,
            Ok(Outbound::Closed) => return frames + queue.drain().len(),
            Err(_) => panic!("timed out waiting for the queue to close"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportClosed;

impl fmt::Display for TransportClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("transport closed")
    }
}

/// A frame sink whose output can be inspected from the test.
pub fn frame_sink() -> (
    impl Sink<huddle_chat::WireFrame, Error = TransportClosed> + Unpin + Send + 'static,
    mpsc::UnboundedReceiver<huddle_chat::WireFrame>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = futures_util::sink::unfold(tx, |tx, frame: huddle_chat::WireFrame| async move {
        tx.send(frame).map_err(|_| TransportClosed)?;
        Ok::<_, TransportClosed>(tx)
    });
    (Box::pin(sink), rx)
}

/// A frame stream fed from the test.
pub fn frame_stream() -> (
    mpsc::UnboundedSender<Result<huddle_chat::WireFrame, TransportClosed>>,
    impl Stream<Item = Result<huddle_chat::WireFrame, TransportClosed>> + Unpin + Send + 'static,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    (tx, Box::pin(stream))
}
