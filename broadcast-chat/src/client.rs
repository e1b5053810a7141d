//! Per-connection client state: identity, nickname, and the delivery conduit
//! the hub uses to reach the connection's outbound loop.

use std::{fmt, time::Duration};

use tokio::sync::mpsc::{
    self,
    error::{SendTimeoutError, TrySendError},
};

use crate::message::ChatMessage;

/// Key under which a client is registered with the hub.
pub type ClientId = String;

/// Receiving end of a conduit, drained by the connection's outbound loop.
pub type Inbox = mpsc::Receiver<ChatMessage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Long-lived line-oriented connection (telnet, netcat).
    Stream,
    /// Single HTTP call; never registered with the hub.
    Request,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stream => f.write_str("stream"),
            TransportKind::Request => f.write_str("request"),
        }
    }
}

/// Sending end of a client's bounded delivery queue.
///
/// Only the hub writes into a conduit; only the owning connection reads from it.
#[derive(Debug, Clone)]
pub struct Conduit {
    tx: mpsc::Sender<ChatMessage>,
}

impl Conduit {
    pub fn new(capacity: usize) -> (Self, Inbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueues without waiting. Hands the message back if the queue is full.
    pub fn try_deliver(&self, message: ChatMessage) -> Result<(), TrySendError<ChatMessage>> {
        self.tx.try_send(message)
    }

    /// Waits up to `timeout` for queue space.
    pub async fn deliver_within(
        &self,
        message: ChatMessage,
        timeout: Duration,
    ) -> Result<(), SendTimeoutError<ChatMessage>> {
        self.tx.send_timeout(message, timeout).await
    }
}

/// Identity and display name of one connection.
///
/// The handle never holds a conduit: the hub's registry entry is the only
/// sender for a stream client, so dropping that entry closes the inbox.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    nickname: String,
    kind: TransportKind,
}

impl ClientHandle {
    /// Builds the handle for an accepted stream connection.
    pub fn stream(id: impl Into<ClientId>, nickname: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nickname: nickname.into(),
            kind: TransportKind::Stream,
        }
    }

    /// Builds an ephemeral handle for one ingress request. The caller-supplied
    /// sender doubles as identity and nickname.
    pub fn request(sender: impl Into<String>) -> Self {
        let sender = sender.into();
        Self {
            id: sender.clone(),
            nickname: sender,
            kind: TransportKind::Request,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Wraps a line of text from this client as a chat message.
    pub fn message(&self, body: &str) -> ChatMessage {
        ChatMessage::new(self.nickname.clone(), body)
    }
}

/// Lifecycle of one stream connection. Every connection walks this machine
/// exactly once, front to back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    AwaitingIdentity,
    Active,
    Closed,
}

impl ConnectionState {
    pub fn can_advance_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, AwaitingIdentity)
                | (AwaitingIdentity, Active)
                | (AwaitingIdentity, Closed)
                | (Active, Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingIdentity => "awaiting-identity",
            ConnectionState::Active => "active",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
