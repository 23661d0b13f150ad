//! Row decoding: maps SQLite rows onto the `huddle-types` views.
//!
//! Ids are stored as hyphenated UUID text and timestamps as RFC 3339 UTC
//! with fixed microsecond precision, so text comparison orders them.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use huddle_types::models::{ChatMessage, Membership, Room};

pub(crate) const ROOM_COLUMNS: &str = "r.id, r.room_type, r.name, r.description, r.image_url, \
     r.created_by, r.created_at, r.updated_at, r.last_message_at, r.last_message_content, \
     r.last_message_sender_id, r.is_archived";
pub(crate) const ROOM_COLUMN_COUNT: usize = 12;

pub(crate) const MEMBERSHIP_COLUMNS: &str =
    "p.role, p.unread_count, p.is_muted, p.is_pinned, p.last_read_at";

pub(crate) const MESSAGE_COLUMNS: &str = "m.id, m.room_id, m.sender_id, m.message_type, \
     m.content, m.media_urls, m.metadata, m.reply_to_id, m.forwarded_from_id, m.created_at, \
     m.edited_at, m.is_deleted, m.deleted_at";
pub(crate) const MESSAGE_COLUMN_COUNT: usize = 13;

pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_err<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn get_parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_err(idx, e))
}

pub(crate) fn get_opt_parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| s.parse().map_err(|e| conversion_err(idx, e)))
        .transpose()
}

pub(crate) fn get_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    get_parsed(row, idx)
}

pub(crate) fn get_opt_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    get_opt_parsed(row, idx)
}

pub(crate) fn get_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    get_parsed(row, idx)
}

pub(crate) fn get_opt_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    get_opt_parsed(row, idx)
}

/// Decode `ROOM_COLUMNS` starting at `offset`.
pub(crate) fn room_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Room> {
    Ok(Room {
        id: get_uuid(row, offset)?,
        room_type: get_parsed(row, offset + 1)?,
        name: row.get(offset + 2)?,
        description: row.get(offset + 3)?,
        image_url: row.get(offset + 4)?,
        created_by: get_uuid(row, offset + 5)?,
        created_at: get_time(row, offset + 6)?,
        updated_at: get_time(row, offset + 7)?,
        last_message_at: get_opt_time(row, offset + 8)?,
        last_message_content: row.get(offset + 9)?,
        last_message_sender_id: get_opt_uuid(row, offset + 10)?,
        is_archived: row.get(offset + 11)?,
    })
}

/// Decode `MEMBERSHIP_COLUMNS` starting at `offset`.
pub(crate) fn membership_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Membership> {
    Ok(Membership {
        role: get_parsed(row, offset)?,
        unread_count: row.get(offset + 1)?,
        is_muted: row.get(offset + 2)?,
        is_pinned: row.get(offset + 3)?,
        last_read_at: get_opt_time(row, offset + 4)?,
    })
}

/// Decode `MESSAGE_COLUMNS`. Content, media and metadata of a deleted
/// message are suppressed here, at the read boundary.
pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let is_deleted: bool = row.get(11)?;

    let media_json: String = row.get(5)?;
    let media_urls: Vec<String> =
        serde_json::from_str(&media_json).map_err(|e| conversion_err(5, e))?;

    let metadata_json: Option<String> = row.get(6)?;
    let metadata = metadata_json
        .map(|s| serde_json::from_str::<serde_json::Value>(&s).map_err(|e| conversion_err(6, e)))
        .transpose()?;

    let mut message = ChatMessage {
        id: get_uuid(row, 0)?,
        room_id: get_uuid(row, 1)?,
        sender_id: get_uuid(row, 2)?,
        message_type: get_parsed(row, 3)?,
        content: row.get(4)?,
        media_urls,
        metadata,
        reply_to_id: get_opt_uuid(row, 7)?,
        forwarded_from_id: get_opt_uuid(row, 8)?,
        created_at: get_time(row, 9)?,
        edited_at: get_opt_time(row, 10)?,
        is_deleted,
        deleted_at: get_opt_time(row, 12)?,
        reactions: vec![],
        is_read_by_me: false,
    };

    if message.is_deleted {
        message.content = None;
        message.media_urls.clear();
        message.metadata = None;
    }

    Ok(message)
}

/// Order-independent key identifying the direct room of a pair of users.
pub(crate) fn direct_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}", lo, hi)
}
