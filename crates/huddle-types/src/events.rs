use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::api::SendMessageRequest;
use crate::models::ChatMessage;

/// Events sent over the WebSocket gateway as `{ "type": ..., "data": ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Server confirms successful authentication
    ConnectionEstablished { user_id: Uuid, message: String },

    /// This session now receives live events for the room
    RoomJoined { room_id: Uuid },

    RoomLeft { room_id: Uuid },

    /// Persisted copy of a message the user sent, delivered to all of the
    /// sender's devices
    MessageSent(ChatMessage),

    /// A message from someone else in a subscribed room
    NewMessage(ChatMessage),

    TypingIndicator {
        room_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },

    MessageReadReceipt {
        room_id: Uuid,
        user_id: Uuid,
        /// Empty when the reader marked the whole room as read
        message_ids: Vec<Uuid>,
    },

    Pong { timestamp: Option<Value> },

    /// A friend came online or went offline
    UserStatusChange {
        user_id: Uuid,
        is_online: bool,
        last_seen: Option<DateTime<Utc>>,
    },

    ReactionAdded {
        room_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    ReactionRemoved {
        room_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    MessageEdited(ChatMessage),

    MessageDeleted { room_id: Uuid, message_id: Uuid },

    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Returns the room this event belongs to, if it is room-scoped.
    pub fn room_id(&self) -> Option<Uuid> {
        match self {
            Self::RoomJoined { room_id }
            | Self::RoomLeft { room_id }
            | Self::TypingIndicator { room_id, .. }
            | Self::MessageReadReceipt { room_id, .. }
            | Self::ReactionAdded { room_id, .. }
            | Self::ReactionRemoved { room_id, .. }
            | Self::MessageDeleted { room_id, .. } => Some(*room_id),
            Self::MessageSent(m) | Self::NewMessage(m) | Self::MessageEdited(m) => Some(m.room_id),
            _ => None,
        }
    }

    /// The wire `type` tag, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished { .. } => "connection_established",
            Self::RoomJoined { .. } => "room_joined",
            Self::RoomLeft { .. } => "room_left",
            Self::MessageSent(_) => "message_sent",
            Self::NewMessage(_) => "new_message",
            Self::TypingIndicator { .. } => "typing_indicator",
            Self::MessageReadReceipt { .. } => "message_read_receipt",
            Self::Pong { .. } => "pong",
            Self::UserStatusChange { .. } => "user_status_change",
            Self::ReactionAdded { .. } => "reaction_added",
            Self::ReactionRemoved { .. } => "reaction_removed",
            Self::MessageEdited(_) => "message_edited",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::Error { .. } => "error",
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Subscribe this session to live events for a room
    JoinRoom { room_id: Uuid },

    LeaveRoom { room_id: Uuid },

    SendMessage(SendMessageCommand),

    TypingStart { room_id: Uuid },

    TypingStop { room_id: Uuid },

    /// Mark specific messages, or the whole room when `message_ids` is
    /// absent, as read
    MessageRead {
        room_id: Uuid,
        #[serde(default)]
        message_ids: Option<Vec<Uuid>>,
    },

    Ping {
        #[serde(default)]
        timestamp: Option<Value>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageCommand {
    pub room_id: Uuid,
    #[serde(flatten)]
    pub message: SendMessageRequest,
}

const COMMAND_TYPES: &[&str] = &[
    "join_room",
    "leave_room",
    "send_message",
    "typing_start",
    "typing_stop",
    "message_read",
    "ping",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid format")]
    Malformed,
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

impl ClientCommand {
    /// Decode one text frame. Distinguishes an unparseable envelope from a
    /// well-formed envelope carrying a type this server does not know.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let raw: RawEnvelope = serde_json::from_str(text).map_err(|_| DecodeError::Malformed)?;

        if !COMMAND_TYPES.contains(&raw.kind.as_str()) {
            return Err(DecodeError::UnknownType(raw.kind));
        }

        let data = match raw.data {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        serde_json::from_value(serde_json::json!({ "type": raw.kind, "data": data }))
            .map_err(|_| DecodeError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_commands() {
        let room = Uuid::new_v4();
        let text = format!(r#"{{"type":"join_room","data":{{"room_id":"{}"}}}}"#, room);
        match ClientCommand::decode(&text).unwrap() {
            ClientCommand::JoinRoom { room_id } => assert_eq!(room_id, room),
            other => panic!("unexpected command: {:?}", other),
        }

        let text = format!(
            r#"{{"type":"send_message","data":{{"room_id":"{}","content":"hi"}}}}"#,
            room
        );
        match ClientCommand::decode(&text).unwrap() {
            ClientCommand::SendMessage(cmd) => {
                assert_eq!(cmd.room_id, room);
                assert_eq!(cmd.message.content.as_deref(), Some("hi"));
                assert_eq!(cmd.message.message_type, "text");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn ping_without_data() {
        match ClientCommand::decode(r#"{"type":"ping"}"#).unwrap() {
            ClientCommand::Ping { timestamp } => assert!(timestamp.is_none()),
            other => panic!("unexpected command: {:?}", other),
        }
        match ClientCommand::decode(r#"{"type":"ping","data":{"timestamp":12}}"#).unwrap() {
            ClientCommand::Ping { timestamp } => assert_eq!(timestamp, Some(Value::from(12))),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn message_read_ids_are_optional() {
        let room = Uuid::new_v4();
        let text = format!(r#"{{"type":"message_read","data":{{"room_id":"{}"}}}}"#, room);
        match ClientCommand::decode(&text).unwrap() {
            ClientCommand::MessageRead { message_ids, .. } => assert!(message_ids.is_none()),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn decode_errors() {
        let err = |text: &str| ClientCommand::decode(text).unwrap_err();

        assert_eq!(err("not json"), DecodeError::Malformed);
        assert_eq!(err(r#"{"data":{}}"#), DecodeError::Malformed);
        assert_eq!(
            err(r#"{"type":"join_room","data":{"room_id":"nope"}}"#),
            DecodeError::Malformed
        );
        assert_eq!(
            err(r#"{"type":"dance","data":{}}"#),
            DecodeError::UnknownType("dance".into())
        );
    }

    #[test]
    fn server_events_use_envelope_shape() {
        let room_id = Uuid::new_v4();
        let json = serde_json::to_value(ServerEvent::RoomJoined { room_id }).unwrap();
        assert_eq!(json["type"], "room_joined");
        assert_eq!(json["data"]["room_id"], room_id.to_string());

        let json = serde_json::to_value(ServerEvent::error("boom")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["data"]["message"], "boom");

        let event = ServerEvent::TypingIndicator {
            room_id,
            user_id: Uuid::new_v4(),
            is_typing: true,
        };
        assert_eq!(serde_json::to_value(&event).unwrap()["type"], event.kind());
        assert_eq!(event.room_id(), Some(room_id));
    }
}
