//! The hub: sole owner of the client registry and the broadcast fan-out.
//!
//! Adapters never touch the registry. They talk to the hub through a
//! [`HubHandle`], which pushes events onto a single queue. The dispatch loop
//! in [`Hub::run`] pops one event at a time and handles it completely before
//! looking at the next, so registrations, deregistrations, and broadcasts are
//! totally ordered without any locking.
//!
//! Fan-out never waits on a client. Every registered client gets a
//! [`Forwarder`] task with its own unbounded pending queue; the dispatch loop
//! only appends to that queue. The forwarder moves messages into the client's
//! bounded conduit strictly in the order they were queued, waiting up to the
//! configured delivery timeout for room before dropping the head message.

use std::{collections::HashMap, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    sync::{
        mpsc::{
            self,
            error::{SendTimeoutError, TrySendError},
        },
        oneshot,
    },
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    client::{ClientId, Conduit},
    message::ChatMessage,
};

pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_millis(1000);

enum HubEvent {
    Submit(ChatMessage),
    Register {
        id: ClientId,
        conduit: Conduit,
    },
    Deregister {
        id: ClientId,
    },
    Roster {
        respond_to: oneshot::Sender<Vec<ClientId>>,
    },
}

/// Cloneable entry point into a running hub.
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::UnboundedSender<HubEvent>,
}

impl HubHandle {
    /// Queues a message for broadcast to every client registered when the
    /// hub gets to it. Never blocks.
    pub fn submit(&self, message: ChatMessage) {
        self.send(HubEvent::Submit(message));
    }

    /// Routes future broadcasts for `id` into `conduit`, replacing any
    /// conduit already registered under the same identity.
    pub fn register(&self, id: impl Into<ClientId>, conduit: Conduit) {
        self.send(HubEvent::Register {
            id: id.into(),
            conduit,
        });
    }

    /// Stops broadcasts to `id`. Unknown identities are ignored.
    pub fn deregister(&self, id: impl Into<ClientId>) {
        self.send(HubEvent::Deregister { id: id.into() });
    }

    /// Identities registered at the moment the hub handles this request, sorted.
    pub async fn roster(&self) -> Result<Vec<ClientId>> {
        let (respond_to, response) = oneshot::channel();
        self.events
            .send(HubEvent::Roster { respond_to })
            .map_err(|_| anyhow::anyhow!("hub is not running"))?;
        response.await.context("hub dropped roster request")
    }

    fn send(&self, event: HubEvent) {
        if self.events.send(event).is_err() {
            warn!("hub is not running; event dropped");
        }
    }
}

pub struct Hub {
    events: mpsc::UnboundedReceiver<HubEvent>,
    registry: HashMap<ClientId, Forwarder>,
    delivery_timeout: Duration,
}

impl Hub {
    pub fn new(delivery_timeout: Duration) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Self {
            events: rx,
            registry: HashMap::new(),
            delivery_timeout,
        };
        (hub, HubHandle { events: tx })
    }

    /// Starts the dispatch loop on its own task.
    pub fn spawn(delivery_timeout: Duration) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(delivery_timeout);
        let task = tokio::spawn(hub.run());
        (handle, task)
    }

    /// Runs until every [`HubHandle`] has been dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            self.handle_event(event);
        }
        debug!("hub dispatch loop finished");
    }

    fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Submit(message) => self.broadcast(message),
            HubEvent::Register { id, conduit } => {
                let forwarder = Forwarder::spawn(id.clone(), conduit, self.delivery_timeout);
                if self.registry.insert(id.clone(), forwarder).is_some() {
                    info!(client = %id, "client re-registered; previous conduit replaced");
                } else {
                    info!(client = %id, total = self.registry.len(), "client registered");
                }
            }
            HubEvent::Deregister { id } => {
                if self.registry.remove(&id).is_some() {
                    info!(client = %id, total = self.registry.len(), "client deregistered");
                } else {
                    debug!(client = %id, "deregister for unknown client ignored");
                }
            }
            HubEvent::Roster { respond_to } => {
                let mut roster: Vec<ClientId> = self.registry.keys().cloned().collect();
                roster.sort_unstable();
                let _ = respond_to.send(roster);
            }
        }
    }

    fn broadcast(&self, message: ChatMessage) {
        info!(
            sender = message.sender(),
            system = message.is_system(),
            recipients = self.registry.len(),
            "broadcasting message"
        );
        debug!(
            body = message.body(),
            timestamp = message.timestamp(),
            "message body"
        );

        for (id, forwarder) in &self.registry {
            if !forwarder.push(message.clone()) {
                debug!(client = %id, "forwarder gone; skipping delivery");
            }
        }
    }
}

/// Per-client delivery task owned by the registry entry.
///
/// Dropping the forwarder closes its pending queue; the task then delivers
/// whatever is still queued and drops the conduit, which closes the client's
/// inbox.
struct Forwarder {
    pending: mpsc::UnboundedSender<ChatMessage>,
}

impl Forwarder {
    fn spawn(id: ClientId, conduit: Conduit, timeout: Duration) -> Self {
        let (pending, queue) = mpsc::unbounded_channel();
        tokio::spawn(forward(id, conduit, queue, timeout));
        Self { pending }
    }

    /// Appends to the pending queue. `false` once the client's conduit closed.
    fn push(&self, message: ChatMessage) -> bool {
        self.pending.send(message).is_ok()
    }
}

async fn forward(
    id: ClientId,
    conduit: Conduit,
    mut queue: mpsc::UnboundedReceiver<ChatMessage>,
    timeout: Duration,
) {
    while let Some(message) = queue.recv().await {
        let message = match conduit.try_deliver(message) {
            Ok(()) => continue,
            Err(TrySendError::Full(message)) => message,
            Err(TrySendError::Closed(_)) => break,
        };
        match conduit.deliver_within(message, timeout).await {
            Ok(()) => debug!(client = %id, "delayed delivery completed"),
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(client = %id, ?timeout, "client too slow; message dropped");
            }
            Err(SendTimeoutError::Closed(_)) => break,
        }
    }
    debug!(client = %id, "forwarder finished");
}
