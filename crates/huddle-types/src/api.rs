use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MessageBody, MessageKind, NewMessage, ValidationError};

// -- JWT Claims --

/// JWT claims accepted by the identity verifier. Tokens are issued by the
/// surrounding application; this service only validates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Rooms --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateDirectRoomRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGroupRoomRequest {
    pub name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub participant_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct RoomListQuery {
    #[serde(default)]
    pub skip: u32,
    #[serde(default = "default_room_limit")]
    pub limit: u32,
}

fn default_room_limit() -> u32 {
    50
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddParticipantRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePreferencesRequest {
    pub muted: Option<bool>,
    pub pinned: Option<bool>,
}

// -- Messages --

/// Message input shared by the REST endpoint and the `send_message`
/// WebSocket command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub content: Option<String>,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    pub media_urls: Option<Vec<String>>,
    pub reply_to_id: Option<Uuid>,
    pub forwarded_from_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
}

fn default_message_type() -> String {
    MessageKind::Text.as_str().to_string()
}

impl TryFrom<SendMessageRequest> for NewMessage {
    type Error = ValidationError;

    fn try_from(req: SendMessageRequest) -> Result<Self, Self::Error> {
        let kind: MessageKind = req.message_type.parse()?;
        Ok(NewMessage {
            body: MessageBody::new(kind, req.content, req.media_urls.unwrap_or_default())?,
            reply_to_id: req.reply_to_id,
            forwarded_from_id: req.forwarded_from_id,
            metadata: req.metadata,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_message_limit")]
    pub limit: u32,
    /// Cursor: id of the oldest message from the previous page.
    pub before: Option<Uuid>,
}

fn default_message_limit() -> u32 {
    50
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub message_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub receipts_created: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditMessageRequest {
    pub content: String,
}

// -- Reactions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Serialize)]
pub struct ReactionResponse {
    /// False when the request was a no-op (duplicate add, absent remove).
    pub changed: bool,
}
