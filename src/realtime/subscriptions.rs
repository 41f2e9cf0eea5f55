//! Per-connection poll subscriptions.
//!
//! The table mapping connections to poll groups is owned by a single actor
//! task; everything else talks to it through [`SubscriptionManager`]
//! messages. Nothing here survives a disconnect: a reconnecting client must
//! join its polls again.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::realtime::events::PollEvent;

pub type ConnectionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Subscribed(usize),
    Disconnected,
}

enum Command {
    Connect {
        id: ConnectionId,
        outbox: mpsc::Sender<PollEvent>,
    },
    Join {
        id: ConnectionId,
        poll_id: Uuid,
    },
    Leave {
        id: ConnectionId,
        poll_id: Uuid,
    },
    Heartbeat {
        id: ConnectionId,
    },
    Disconnect {
        id: ConnectionId,
    },
    Deliver(PollEvent),
    State {
        id: ConnectionId,
        reply: oneshot::Sender<ConnectionState>,
    },
    LastHeartbeat {
        id: ConnectionId,
        reply: oneshot::Sender<Option<DateTime<Utc>>>,
    },
}

struct Connection {
    outbox: mpsc::Sender<PollEvent>,
    polls: HashSet<Uuid>,
    last_heartbeat: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct SubscriptionTable {
    connections: HashMap<ConnectionId, Connection>,
    groups: HashMap<Uuid, HashSet<ConnectionId>>,
}

impl SubscriptionTable {
    fn connect(&mut self, id: ConnectionId, outbox: mpsc::Sender<PollEvent>) {
        self.connections.insert(
            id,
            Connection {
                outbox,
                polls: HashSet::new(),
                last_heartbeat: None,
            },
        );
    }

    fn join(&mut self, id: ConnectionId, poll_id: Uuid) -> bool {
        let Some(connection) = self.connections.get_mut(&id) else {
            return false;
        };
        connection.polls.insert(poll_id);
        self.groups.entry(poll_id).or_default().insert(id);
        true
    }

    fn leave(&mut self, id: ConnectionId, poll_id: Uuid) {
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.polls.remove(&poll_id);
        }
        self.remove_member(poll_id, id);
    }

    fn heartbeat(&mut self, id: ConnectionId) {
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.last_heartbeat = Some(Utc::now());
        }
    }

    fn disconnect(&mut self, id: ConnectionId) {
        if let Some(connection) = self.connections.remove(&id) {
            for poll_id in connection.polls {
                self.remove_member(poll_id, id);
            }
        }
    }

    fn remove_member(&mut self, poll_id: Uuid, id: ConnectionId) {
        if let Some(members) = self.groups.get_mut(&poll_id) {
            members.remove(&id);
            if members.is_empty() {
                self.groups.remove(&poll_id);
            }
        }
    }

    fn state(&self, id: ConnectionId) -> ConnectionState {
        match self.connections.get(&id) {
            None => ConnectionState::Disconnected,
            Some(c) if c.polls.is_empty() => ConnectionState::Connected,
            Some(c) => ConnectionState::Subscribed(c.polls.len()),
        }
    }

    /// Hands the event to every member of the poll's group without waiting.
    /// Full outboxes drop the event; closed ones are unregistered.
    fn deliver(&mut self, event: &PollEvent) -> usize {
        let poll_id = event.poll_id();
        let Some(members) = self.groups.get(&poll_id) else {
            return 0;
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for id in members {
            let Some(connection) = self.connections.get(id) else {
                continue;
            };
            match connection.outbox.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(connection_id = %id, event = event.name(), "outbox full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in closed {
            self.disconnect(id);
        }
        delivered
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Connect { id, outbox } => self.connect(id, outbox),
            Command::Join { id, poll_id } => {
                if !self.join(id, poll_id) {
                    warn!(connection_id = %id, poll_id = %poll_id, "join from unknown connection");
                }
            }
            Command::Leave { id, poll_id } => self.leave(id, poll_id),
            Command::Heartbeat { id } => self.heartbeat(id),
            Command::Disconnect { id } => self.disconnect(id),
            Command::Deliver(event) => {
                let delivered = self.deliver(&event);
                debug!(poll_id = %event.poll_id(), event = event.name(), delivered, "group delivery");
            }
            Command::State { id, reply } => {
                let _ = reply.send(self.state(id));
            }
            Command::LastHeartbeat { id, reply } => {
                let last = self.connections.get(&id).and_then(|c| c.last_heartbeat);
                let _ = reply.send(last);
            }
        }
    }
}

/// Handle to the subscription actor. Cheap to clone.
#[derive(Clone)]
pub struct SubscriptionManager {
    tx: mpsc::UnboundedSender<Command>,
    outbox_capacity: usize,
}

impl SubscriptionManager {
    /// Spawns the actor on the current runtime.
    pub fn spawn(outbox_capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut table = SubscriptionTable::default();
            while let Some(command) = rx.recv().await {
                table.apply(command);
            }
            debug!("subscription manager stopped");
        });

        Self {
            tx,
            outbox_capacity: outbox_capacity.max(1),
        }
    }

    /// Registers a new connection and returns its id and event outbox.
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<PollEvent>) {
        let id = Uuid::new_v4();
        let (outbox, rx) = mpsc::channel(self.outbox_capacity);
        self.send(Command::Connect { id, outbox });
        (id, rx)
    }

    pub fn join(&self, id: ConnectionId, poll_id: Uuid) {
        self.send(Command::Join { id, poll_id });
    }

    pub fn leave(&self, id: ConnectionId, poll_id: Uuid) {
        self.send(Command::Leave { id, poll_id });
    }

    pub fn heartbeat(&self, id: ConnectionId) {
        self.send(Command::Heartbeat { id });
    }

    pub fn disconnect(&self, id: ConnectionId) {
        self.send(Command::Disconnect { id });
    }

    pub(crate) fn deliver(&self, event: PollEvent) {
        self.send(Command::Deliver(event));
    }

    pub async fn state(&self, id: ConnectionId) -> ConnectionState {
        let (reply, rx) = oneshot::channel();
        self.send(Command::State { id, reply });
        rx.await.unwrap_or(ConnectionState::Disconnected)
    }

    pub async fn last_heartbeat(&self, id: ConnectionId) -> Option<DateTime<Utc>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::LastHeartbeat { id, reply });
        rx.await.ok().flatten()
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            warn!("subscription manager is gone, dropping command");
        }
    }
}

/// Unregisters the connection when dropped.
pub struct ConnectionGuard {
    id: ConnectionId,
    manager: SubscriptionManager,
}

impl ConnectionGuard {
    pub fn new(id: ConnectionId, manager: SubscriptionManager) -> Self {
        Self { id, manager }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.manager.disconnect(self.id);
    }
}
