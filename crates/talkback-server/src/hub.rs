//! The connection hub: registry and dispatcher for live push sessions.
//!
//! All structural changes to the registry go through one owner task that
//! processes [`HubCommand`]s in order, so the membership map is never read
//! and written concurrently. [`Hub`] is a cheap cloneable handle onto that
//! task's command channel.
//!
//! Delivery to a connection never blocks: each connection has a bounded
//! outbound channel and a consumer that cannot keep up is evicted.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use talkback_types::UserId;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

/// Lifecycle of a single connection. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Registered,
    Unregistered,
    Evicted,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Unregistered | Self::Evicted)
    }

    fn can_advance_to(self, next: ConnectionState) -> bool {
        match self {
            Self::Connecting => next != Self::Connecting,
            Self::Registered => next.is_terminal(),
            Self::Unregistered | Self::Evicted => false,
        }
    }
}

/// An event addressed to one user, framed as `{"type": tag, "data": payload}`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    pub user_id: UserId,
    pub tag: String,
    pub payload: Value,
}

impl OutboundEvent {
    pub fn frame(&self) -> String {
        frame(&self.tag, &self.payload)
    }
}

fn frame(tag: &str, payload: &Value) -> String {
    json!({ "type": tag, "data": payload }).to_string()
}

/// The hub's side of a live session.
#[derive(Debug)]
pub struct Connection {
    id: Uuid,
    user_id: UserId,
    username: String,
    sender: mpsc::Sender<String>,
    state: watch::Sender<ConnectionState>,
}

/// The transport's side of a live session.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: Uuid,
    /// Frames to write to the peer. Yields `None` once the hub has dropped
    /// the connection.
    pub frames: mpsc::Receiver<String>,
    pub state: watch::Receiver<ConnectionState>,
}

impl Connection {
    /// Creates a connection in the `Connecting` state with an outbound
    /// buffer of `capacity` frames.
    pub fn new(
        user_id: UserId,
        username: impl Into<String>,
        capacity: usize,
    ) -> (Self, ConnectionHandle) {
        let id = Uuid::new_v4();
        let (sender, frames) = mpsc::channel(capacity.max(1));
        let (state, state_rx) = watch::channel(ConnectionState::Connecting);
        (
            Self {
                id,
                user_id,
                username: username.into(),
                sender,
                state,
            },
            ConnectionHandle {
                id,
                frames,
                state: state_rx,
            },
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    fn advance(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if current.can_advance_to(next) {
                *current = next;
                true
            } else {
                false
            }
        });
    }
}

#[derive(Debug)]
pub enum HubCommand {
    Register(Connection),
    Unregister { user_id: UserId, conn_id: Uuid },
    Send(OutboundEvent),
    Broadcast { tag: String, payload: Value },
    Snapshot(oneshot::Sender<Vec<UserId>>),
}

/// Handle onto the hub's owner task.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl Hub {
    /// Spawns the owner task. Must be called from within a tokio runtime.
    ///
    /// The task exits once every `Hub` clone has been dropped.
    pub fn new() -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(Registry::default().run(rx));
        Self { commands }
    }

    /// Installs `conn` as the live session for its user, evicting any
    /// previous one.
    pub fn register(&self, conn: Connection) {
        self.submit(HubCommand::Register(conn));
    }

    /// Removes the session `conn_id` if it is still the live one for
    /// `user_id`.
    pub fn unregister(&self, user_id: UserId, conn_id: Uuid) {
        self.submit(HubCommand::Unregister { user_id, conn_id });
    }

    /// Delivers an event to `user_id`'s live session, if there is one.
    pub fn send_to_user(&self, user_id: UserId, tag: &str, payload: impl Serialize) {
        let Some(payload) = to_value(tag, payload) else {
            return;
        };
        self.submit(HubCommand::Send(OutboundEvent {
            user_id,
            tag: tag.to_string(),
            payload,
        }));
    }

    /// Delivers an event to every live session.
    pub fn broadcast_all(&self, tag: &str, payload: impl Serialize) {
        let Some(payload) = to_value(tag, payload) else {
            return;
        };
        self.submit(HubCommand::Broadcast {
            tag: tag.to_string(),
            payload,
        });
    }

    /// Users with a live session, after every previously submitted command
    /// has been applied.
    pub async fn connected_users(&self) -> Vec<UserId> {
        let (tx, rx) = oneshot::channel();
        self.submit(HubCommand::Snapshot(tx));
        let mut users = rx.await.unwrap_or_default();
        users.sort_unstable();
        users
    }

    fn submit(&self, command: HubCommand) {
        if self.commands.send(command).is_err() {
            tracing::debug!("hub task has stopped; command dropped");
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

fn to_value(tag: &str, payload: impl Serialize) -> Option<Value> {
    match serde_json::to_value(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(tag, "failed to serialize event payload: {}", e);
            None
        }
    }
}

/// State owned exclusively by the hub task.
#[derive(Default)]
struct Registry {
    connections: HashMap<UserId, Connection>,
}

impl Registry {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<HubCommand>) {
        while let Some(command) = commands.recv().await {
            self.apply(command);
        }
        for (_, conn) in self.connections.drain() {
            conn.advance(ConnectionState::Unregistered);
        }
        tracing::debug!("hub task stopped");
    }

    fn apply(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register(conn) => self.register(conn),
            HubCommand::Unregister { user_id, conn_id } => self.unregister(user_id, conn_id),
            HubCommand::Send(event) => self.send(event),
            HubCommand::Broadcast { tag, payload } => self.broadcast(&tag, &payload),
            HubCommand::Snapshot(reply) => {
                let _ = reply.send(self.connections.keys().copied().collect());
            }
        }
    }

    fn register(&mut self, conn: Connection) {
        conn.advance(ConnectionState::Registered);
        tracing::info!(
            user_id = conn.user_id,
            username = %conn.username,
            conn_id = %conn.id,
            "connection registered"
        );
        if let Some(previous) = self.connections.insert(conn.user_id, conn) {
            tracing::info!(
                user_id = previous.user_id,
                conn_id = %previous.id,
                "evicting connection replaced by a newer session"
            );
            previous.advance(ConnectionState::Evicted);
        }
    }

    fn unregister(&mut self, user_id: UserId, conn_id: Uuid) {
        match self.connections.get(&user_id) {
            Some(current) if current.id == conn_id => {
                if let Some(conn) = self.connections.remove(&user_id) {
                    conn.advance(ConnectionState::Unregistered);
                    tracing::info!(user_id, conn_id = %conn_id, "connection unregistered");
                }
            }
            _ => tracing::debug!(user_id, conn_id = %conn_id, "ignoring stale unregister"),
        }
    }

    fn send(&mut self, event: OutboundEvent) {
        let Some(conn) = self.connections.get(&event.user_id) else {
            tracing::debug!(
                user_id = event.user_id,
                tag = %event.tag,
                "no live session; event discarded"
            );
            return;
        };
        if let Err(reason) = offer(conn, event.frame()) {
            self.evict(event.user_id, reason);
        }
    }

    fn broadcast(&mut self, tag: &str, payload: &Value) {
        let text = frame(tag, payload);
        let failed: Vec<(UserId, &'static str)> = self
            .connections
            .iter()
            .filter_map(|(user_id, conn)| {
                offer(conn, text.clone())
                    .err()
                    .map(|reason| (*user_id, reason))
            })
            .collect();
        for (user_id, reason) in failed {
            self.evict(user_id, reason);
        }
    }

    fn evict(&mut self, user_id: UserId, reason: &'static str) {
        if let Some(conn) = self.connections.remove(&user_id) {
            tracing::warn!(user_id, conn_id = %conn.id, reason, "evicting connection");
            conn.advance(ConnectionState::Evicted);
        }
    }
}

fn offer(conn: &Connection, text: String) -> Result<(), &'static str> {
    match conn.sender.try_send(text) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) => Err("outbound buffer saturated"),
        Err(TrySendError::Closed(_)) => Err("writer closed"),
    }
}
