use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use huddle_types::events::ServerEvent;
use huddle_types::models::ChatMessage;

/// Identifies one live transport connection.
pub type ConnectionId = Uuid;

/// Per-connection outbound channel. The connection's writer task owns the
/// receiving half; a closed channel means the connection is gone.
pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

/// Fan-out hook for multi-instance deployments. Every delivery made by the
/// local registry is also handed to the relay, which forwards it to the
/// registries of other processes (message bus, pub/sub, ...).
pub trait Relay: Send + Sync {
    fn to_user(&self, user: Uuid, event: &ServerEvent);
    fn to_room(&self, room: Uuid, event: &ServerEvent, exclude: Option<Uuid>);
}

/// Outcome of dropping a connection from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// The connection was not (or no longer) known.
    NotRegistered,
    /// The user still has other live connections.
    StillConnected,
    /// That was the user's last connection.
    WentOffline,
}

/// Who is connected, from how many devices, and which rooms each user's
/// session is subscribed to. Cheap to clone; all clones share state.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    state: RwLock<RegistryState>,
    relay: Option<Arc<dyn Relay>>,
}

#[derive(Default)]
struct RegistryState {
    users: HashMap<Uuid, UserEntry>,
    /// conn_id -> user_id. Outlives pruning so `unregister` can still
    /// report the departure of a connection that was pruned earlier.
    owners: HashMap<ConnectionId, Uuid>,
}

#[derive(Default)]
struct UserEntry {
    connections: HashMap<ConnectionId, Outbox>,
    rooms: HashSet<Uuid>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_relay(relay: Arc<dyn Relay>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: RwLock::default(),
                relay: Some(relay),
            }),
        }
    }

    /// Add a connection for `user`. Returns true when this is the user's
    /// first live connection. Registering the same connection twice only
    /// replaces its outbox.
    pub async fn register(&self, user: Uuid, conn_id: ConnectionId, outbox: Outbox) -> bool {
        let mut state = self.inner.state.write().await;
        state.owners.insert(conn_id, user);

        let entry = state.users.entry(user).or_default();
        let first = entry.connections.is_empty();
        entry.connections.insert(conn_id, outbox);

        debug!(
            "registered connection {} for {} ({} live)",
            conn_id,
            user,
            entry.connections.len()
        );
        first
    }

    /// Remove a connection. When it was the user's last one the user entry,
    /// including room subscriptions, is dropped.
    pub async fn unregister(&self, conn_id: ConnectionId) -> Departure {
        let mut state = self.inner.state.write().await;
        let Some(user) = state.owners.remove(&conn_id) else {
            return Departure::NotRegistered;
        };

        let Some(entry) = state.users.get_mut(&user) else {
            // Already pruned along with the rest of the user's connections.
            return Departure::WentOffline;
        };

        entry.connections.remove(&conn_id);
        if entry.connections.is_empty() {
            state.users.remove(&user);
            Departure::WentOffline
        } else {
            Departure::StillConnected
        }
    }

    pub async fn subscribe(&self, user: Uuid, room: Uuid) -> bool {
        let mut state = self.inner.state.write().await;
        match state.users.get_mut(&user) {
            Some(entry) => {
                entry.rooms.insert(room);
                true
            }
            None => false,
        }
    }

    pub async fn unsubscribe(&self, user: Uuid, room: Uuid) -> bool {
        let mut state = self.inner.state.write().await;
        state
            .users
            .get_mut(&user)
            .is_some_and(|entry| entry.rooms.remove(&room))
    }

    pub async fn is_online(&self, user: Uuid) -> bool {
        self.inner.state.read().await.users.contains_key(&user)
    }

    pub async fn connection_count(&self, user: Uuid) -> usize {
        self.inner
            .state
            .read()
            .await
            .users
            .get(&user)
            .map_or(0, |entry| entry.connections.len())
    }

    /// Users whose session is subscribed to `room`.
    pub async fn subscribers(&self, room: Uuid) -> Vec<Uuid> {
        self.inner
            .state
            .read()
            .await
            .users
            .iter()
            .filter(|(_, entry)| entry.rooms.contains(&room))
            .map(|(user, _)| *user)
            .collect()
    }

    /// Deliver to every live connection of `user`. Returns the number of
    /// connections reached; dead ones are pruned.
    pub async fn send_to_user(&self, user: Uuid, event: ServerEvent) -> usize {
        let (delivered, dead) = {
            let state = self.inner.state.read().await;
            let mut delivered = 0;
            let mut dead = Vec::new();
            if let Some(entry) = state.users.get(&user) {
                for (conn_id, outbox) in &entry.connections {
                    if outbox.send(event.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        dead.push((user, *conn_id));
                    }
                }
            }
            (delivered, dead)
        };

        self.prune(dead).await;
        if let Some(relay) = &self.inner.relay {
            relay.to_user(user, &event);
        }
        delivered
    }

    /// Deliver to every user subscribed to `room` except `exclude`. Returns
    /// the number of connections reached.
    pub async fn broadcast_to_room(&self, room: Uuid, event: ServerEvent, exclude: Option<Uuid>) -> usize {
        let (delivered, dead) = {
            let state = self.inner.state.read().await;
            let mut delivered = 0;
            let mut dead = Vec::new();
            for (user, entry) in &state.users {
                if Some(*user) == exclude || !entry.rooms.contains(&room) {
                    continue;
                }
                for (conn_id, outbox) in &entry.connections {
                    if outbox.send(event.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        dead.push((*user, *conn_id));
                    }
                }
            }
            (delivered, dead)
        };

        self.prune(dead).await;
        if let Some(relay) = &self.inner.relay {
            relay.to_room(room, &event, exclude);
        }
        delivered
    }

    /// Fan out a freshly persisted message: `message_sent` to all of the
    /// sender's devices, `new_message` to the room's other subscribers.
    pub async fn deliver_message(&self, message: ChatMessage) {
        let sender = message.sender_id;
        let room = message.room_id;
        self.send_to_user(sender, ServerEvent::MessageSent(message.clone()))
            .await;
        self.broadcast_to_room(room, ServerEvent::NewMessage(message), Some(sender))
            .await;
    }

    async fn prune(&self, dead: Vec<(Uuid, ConnectionId)>) {
        if dead.is_empty() {
            return;
        }

        let mut state = self.inner.state.write().await;
        for (user, conn_id) in dead {
            let Some(entry) = state.users.get_mut(&user) else {
                continue;
            };
            // The connection may have been replaced since the failed send.
            if entry.connections.get(&conn_id).is_some_and(|tx| tx.is_closed()) {
                entry.connections.remove(&conn_id);
                warn!("pruned dead connection {} of {}", conn_id, user);
            }
            if entry.connections.is_empty() {
                state.users.remove(&user);
            }
        }
    }
}
