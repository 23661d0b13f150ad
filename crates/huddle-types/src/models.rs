use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rejected input for a message or a room.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

// -- Rooms --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    Direct,
    Group,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }
}

impl FromStr for RoomKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "group" => Ok(Self::Group),
            other => Err(ValidationError(format!("unknown room type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Member,
    Admin,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Admin => "admin",
        }
    }
}

impl FromStr for ParticipantRole {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(Self::Member),
            "admin" => Ok(Self::Admin),
            other => Err(ValidationError(format!("unknown participant role: {}", other))),
        }
    }
}

/// Room metadata including the denormalized last-message cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub room_type: RoomKind,
    pub name: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_content: Option<String>,
    pub last_message_sender_id: Option<Uuid>,
    pub is_archived: bool,
}

/// The requesting user's own participant state in a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub role: ParticipantRole,
    pub unread_count: i64,
    pub is_muted: bool,
    pub is_pinned: bool,
    pub last_read_at: Option<DateTime<Utc>>,
}

/// One entry of a user's room list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSummary {
    #[serde(flatten)]
    pub room: Room,
    #[serde(flatten)]
    pub membership: Membership,
    pub participant_count: i64,
}

/// Full room view: metadata plus every active participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomDetail {
    #[serde(flatten)]
    pub room: Room,
    #[serde(flatten)]
    pub membership: Membership,
    pub participants: Vec<ParticipantView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantView {
    pub user_id: Uuid,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    /// Filled in from the profile directory when available.
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

// -- Presence & profiles --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub user_id: Uuid,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: Uuid,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

// -- Messages --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    File,
    System,
    WorkoutShare,
    ChallengeShare,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::File => "file",
            Self::System => "system",
            Self::WorkoutShare => "workout_share",
            Self::ChallengeShare => "challenge_share",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "file" => Ok(Self::File),
            "system" => Ok(Self::System),
            "workout_share" => Ok(Self::WorkoutShare),
            "challenge_share" => Ok(Self::ChallengeShare),
            other => Err(ValidationError(format!("unknown message type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareKind {
    Workout,
    Challenge,
}

/// Validated message payload. Each variant carries exactly the fields its
/// kind requires, so an invalid combination cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    Media {
        kind: MediaKind,
        urls: Vec<String>,
        caption: Option<String>,
    },
    System(String),
    Share {
        kind: ShareKind,
        content: Option<String>,
        media_urls: Vec<String>,
    },
}

impl MessageBody {
    /// Build a body from loosely-typed input. Blank content and blank URLs
    /// are treated as absent.
    pub fn new(
        kind: MessageKind,
        content: Option<String>,
        media_urls: Vec<String>,
    ) -> Result<Self, ValidationError> {
        let content = content
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        let urls: Vec<String> = media_urls
            .into_iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();

        match kind {
            MessageKind::Text => content
                .map(Self::Text)
                .ok_or_else(|| ValidationError::new("text messages require content")),
            MessageKind::System => content
                .map(Self::System)
                .ok_or_else(|| ValidationError::new("system messages require content")),
            MessageKind::Image => media_body(MediaKind::Image, urls, content),
            MessageKind::Video => media_body(MediaKind::Video, urls, content),
            MessageKind::Audio => media_body(MediaKind::Audio, urls, content),
            MessageKind::File => media_body(MediaKind::File, urls, content),
            MessageKind::WorkoutShare | MessageKind::ChallengeShare => {
                if content.is_none() && urls.is_empty() {
                    return Err(ValidationError::new(
                        "message requires content or media urls",
                    ));
                }
                let share = if kind == MessageKind::WorkoutShare {
                    ShareKind::Workout
                } else {
                    ShareKind::Challenge
                };
                Ok(Self::Share {
                    kind: share,
                    content,
                    media_urls: urls,
                })
            }
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::System(_) => MessageKind::System,
            Self::Media { kind, .. } => match kind {
                MediaKind::Image => MessageKind::Image,
                MediaKind::Video => MessageKind::Video,
                MediaKind::Audio => MessageKind::Audio,
                MediaKind::File => MessageKind::File,
            },
            Self::Share { kind, .. } => match kind {
                ShareKind::Workout => MessageKind::WorkoutShare,
                ShareKind::Challenge => MessageKind::ChallengeShare,
            },
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Text(c) | Self::System(c) => Some(c),
            Self::Media { caption, .. } => caption.as_deref(),
            Self::Share { content, .. } => content.as_deref(),
        }
    }

    pub fn media_urls(&self) -> &[String] {
        match self {
            Self::Media { urls, .. } => urls,
            Self::Share { media_urls, .. } => media_urls,
            Self::Text(_) | Self::System(_) => &[],
        }
    }

    /// Short text stored in the room's last-message cache.
    pub fn preview(&self) -> String {
        if let Some(content) = self.content() {
            return content.chars().take(PREVIEW_CHARS).collect();
        }
        format!("[{}]", self.kind())
    }
}

const PREVIEW_CHARS: usize = 200;

fn media_body(
    kind: MediaKind,
    urls: Vec<String>,
    caption: Option<String>,
) -> Result<MessageBody, ValidationError> {
    if urls.is_empty() {
        return Err(ValidationError::new(format!(
            "{} messages require at least one media url",
            kind_name(kind)
        )));
    }
    Ok(MessageBody::Media { kind, urls, caption })
}

fn kind_name(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image => "image",
        MediaKind::Video => "video",
        MediaKind::Audio => "audio",
        MediaKind::File => "file",
    }
}

/// A message ready to be persisted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub body: MessageBody,
    pub reply_to_id: Option<Uuid>,
    pub forwarded_from_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
}

impl NewMessage {
    pub fn text(content: impl Into<String>) -> Result<Self, ValidationError> {
        Ok(Self {
            body: MessageBody::new(MessageKind::Text, Some(content.into()), vec![])?,
            reply_to_id: None,
            forwarded_from_id: None,
            metadata: None,
        })
    }
}

/// A persisted message as returned to clients. Deleted messages keep their
/// row but come back with content and media suppressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub message_type: MessageKind,
    pub content: Option<String>,
    pub media_urls: Vec<String>,
    pub metadata: Option<serde_json::Value>,
    pub reply_to_id: Option<Uuid>,
    pub forwarded_from_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reactions: Vec<ReactionGroup>,
    #[serde(default)]
    pub is_read_by_me: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<Uuid>,
}
