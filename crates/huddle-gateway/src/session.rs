//! Per-connection protocol state.
//!
//! A `Session` exists only for an authenticated connection. It owns the
//! connection's registry slot and handles inbound frames one at a time, in
//! arrival order. Every failure while handling a frame becomes an `error`
//! event on this connection; none of them end the session.

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use huddle_db::ChatError;
use huddle_types::events::{ClientCommand, ServerEvent};
use crate::Gateway;
use crate::auth::Identity;
use crate::registry::{ConnectionId, Departure, Outbox};

pub struct Session {
    gateway: Gateway,
    identity: Identity,
    conn_id: ConnectionId,
    /// Replies addressed to this connection only.
    outbox: Outbox,
}

impl Session {
    /// Register the connection, flip presence on the user's first device
    /// and acknowledge. Returns the session and the receiving end of its
    /// outbox, which the caller drains into the transport.
    pub async fn open(
        gateway: Gateway,
        identity: Identity,
    ) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let conn_id = Uuid::new_v4();
        let user = identity.user_id;

        let first = gateway.registry.register(user, conn_id, outbox.clone()).await;
        if first {
            if let Err(e) = gateway.presence.set_online(user).await {
                warn!("failed to mark {} online: {}", user, e);
            }
        }

        info!(
            "{} ({}) connected, connection {}",
            identity.username, user, conn_id
        );

        let session = Self {
            gateway,
            identity,
            conn_id,
            outbox,
        };
        session.reply(ServerEvent::ConnectionEstablished {
            user_id: user,
            message: "Connected to chat server".into(),
        });
        (session, rx)
    }

    pub fn user_id(&self) -> Uuid {
        self.identity.user_id
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.conn_id
    }

    /// Handle one inbound text frame.
    pub async fn handle_text(&self, text: &str) {
        let command = match ClientCommand::decode(text) {
            Ok(command) => command,
            Err(e) => {
                warn!(
                    "{} ({}) bad frame: {} -- raw: {}",
                    self.identity.username,
                    self.user_id(),
                    e,
                    truncate(text, 200)
                );
                self.reply(ServerEvent::error(e.to_string()));
                return;
            }
        };

        if let Err(e) = self.dispatch(command).await {
            if e.is_internal() {
                error!("{} ({}) command failed: {}", self.identity.username, self.user_id(), e);
            } else {
                warn!("{} ({}) command rejected: {}", self.identity.username, self.user_id(), e);
            }
            self.reply(ServerEvent::error(e.client_message()));
        }
    }

    async fn dispatch(&self, command: ClientCommand) -> Result<(), ChatError> {
        let user = self.user_id();
        let registry = &self.gateway.registry;
        let store = &self.gateway.store;

        match command {
            ClientCommand::JoinRoom { room_id } => {
                registry.subscribe(user, room_id).await;
                info!("{} ({}) joined room {}", self.identity.username, user, room_id);
                self.reply(ServerEvent::RoomJoined { room_id });
            }

            ClientCommand::LeaveRoom { room_id } => {
                registry.unsubscribe(user, room_id).await;
                info!("{} ({}) left room {}", self.identity.username, user, room_id);
                self.reply(ServerEvent::RoomLeft { room_id });
            }

            ClientCommand::SendMessage(cmd) => {
                let room_id = cmd.room_id;
                let request = cmd.message;
                let message = store
                    .call(move |db| db.send_request(room_id, user, request))
                    .await?;
                registry.deliver_message(message).await;
            }

            ClientCommand::TypingStart { room_id } => {
                self.typing(room_id, true).await;
            }

            ClientCommand::TypingStop { room_id } => {
                self.typing(room_id, false).await;
            }

            ClientCommand::MessageRead {
                room_id,
                message_ids,
            } => {
                let ids = message_ids.clone();
                store
                    .call(move |db| db.mark_read(room_id, user, ids.as_deref()))
                    .await?;
                registry
                    .broadcast_to_room(
                        room_id,
                        ServerEvent::MessageReadReceipt {
                            room_id,
                            user_id: user,
                            message_ids: message_ids.unwrap_or_default(),
                        },
                        Some(user),
                    )
                    .await;
            }

            ClientCommand::Ping { timestamp } => {
                self.reply(ServerEvent::Pong { timestamp });
            }
        }

        Ok(())
    }

    async fn typing(&self, room_id: Uuid, is_typing: bool) {
        let user = self.user_id();
        self.gateway
            .registry
            .broadcast_to_room(
                room_id,
                ServerEvent::TypingIndicator {
                    room_id,
                    user_id: user,
                    is_typing,
                },
                Some(user),
            )
            .await;
    }

    fn reply(&self, event: ServerEvent) {
        // A closed outbox means the writer is gone; the loop ends shortly.
        let _ = self.outbox.send(event);
    }

    /// Drop the registry slot. The last connection of a user takes the
    /// user offline and notifies friends.
    pub async fn close(&self) {
        let user = self.user_id();
        let departure = self.gateway.registry.unregister(self.conn_id).await;

        if departure == Departure::WentOffline {
            if let Err(e) = self.gateway.presence.set_offline(user).await {
                warn!("failed to mark {} offline: {}", user, e);
            }
            // A new device may have connected while the offline write ran.
            if self.gateway.registry.is_online(user).await {
                if let Err(e) = self.gateway.presence.set_online(user).await {
                    warn!("failed to restore presence of {}: {}", user, e);
                }
            }
        }

        info!(
            "{} ({}) disconnected, connection {}",
            self.identity.username, user, self.conn_id
        );
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
