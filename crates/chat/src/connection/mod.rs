//! Per-client connection state shared by the socket loops and the room hubs.
//!
//! A [`ConnectionHandle`] is the producer side of a bounded outbound buffer. Hubs
//! and history replay only ever `try_deliver` into it; when it is full they
//! evict the connection instead of waiting. The matching [`OutboundQueue`] is
//! drained by the connection's write loop.

pub mod transport;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::types::DeliveryError;

pub type ConnectionId = Uuid;

/// The verified user a connection was admitted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }
}

struct Inner {
    id: ConnectionId,
    identity: Identity,
    outbound: mpsc::Sender<Arc<str>>,
    closed: AtomicBool,
    close_signal: Notify,
}

#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Inner>,
}

impl ConnectionHandle {
    /// Create a connection with an outbound buffer of `capacity` frames.
    pub fn new(identity: Identity, capacity: usize) -> (Self, OutboundQueue) {
        let (outbound, receiver) = mpsc::channel(capacity.max(1));
        let inner = Arc::new(Inner {
            id: Uuid::new_v4(),
            identity,
            outbound,
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
        });

        let queue = OutboundQueue {
            receiver,
            inner: inner.clone(),
        };

        (Self { inner }, queue)
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    /// Queue a serialized frame without waiting.
    pub fn try_deliver(&self, payload: Arc<str>) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }

        self.inner.outbound.try_send(payload).map_err(|error| match error {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Close the outbound buffer. Frames already queued are still flushed by
    /// the write loop before it says goodbye. Returns `false` if the buffer was
    /// already closed.
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.close_signal.notify_one();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.inner.id)
            .field("user_id", &self.inner.identity.user_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// What the write loop should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Arc<str>),
    Closed,
}

/// Consumer side of a connection's outbound buffer.
pub struct OutboundQueue {
    receiver: mpsc::Receiver<Arc<str>>,
    inner: Arc<Inner>,
}

impl OutboundQueue {
    pub fn connection_id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Wait for the next queued frame, or for the buffer to be closed.
    pub async fn next(&mut self) -> Outbound {
        if self.inner.closed.load(Ordering::Acquire) {
            return Outbound::Closed;
        }

        tokio::select! {
            biased;
            _ = self.inner.close_signal.notified() => Outbound::Closed,
            frame = self.receiver.recv() => match frame {
                Some(frame) => Outbound::Frame(frame),
                None => Outbound::Closed,
            },
        }
    }

    /// Stop accepting frames and hand back whatever is still buffered.
    pub fn drain(&mut self) -> Vec<Arc<str>> {
        self.receiver.close();
        let mut remaining = Vec::new();
        while let Ok(frame) = self.receiver.try_recv() {
            remaining.push(frame);
        }
        remaining
    }
}
