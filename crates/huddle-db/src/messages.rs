use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use huddle_types::api::SendMessageRequest;
use huddle_types::models::{ChatMessage, MessageBody, NewMessage, ReactionGroup};

use crate::models::{MESSAGE_COLUMN_COUNT, MESSAGE_COLUMNS, get_uuid, message_from_row, ts};
use crate::rooms::require_participant;
use crate::{ChatError, Database, Result};

const MAX_EMOJI_CHARS: usize = 16;

impl Database {
    // -- Messages --

    /// Persist a message from an active participant, refresh the room's
    /// last-message cache and bump every other active participant's unread
    /// count, all in one transaction.
    pub fn send_message(&self, room_id: Uuid, sender: Uuid, input: NewMessage) -> Result<ChatMessage> {
        self.insert_message(room_id, sender, || Ok(input))
    }

    /// Like `send_message`, for raw client input. Participation is checked
    /// before the input is validated, so outsiders only ever see an
    /// authorization failure.
    pub fn send_request(
        &self,
        room_id: Uuid,
        sender: Uuid,
        req: SendMessageRequest,
    ) -> Result<ChatMessage> {
        self.insert_message(room_id, sender, || Ok(NewMessage::try_from(req)?))
    }

    fn insert_message<F>(&self, room_id: Uuid, sender: Uuid, build: F) -> Result<ChatMessage>
    where
        F: FnOnce() -> Result<NewMessage>,
    {
        let id = Uuid::new_v4();

        let (input, created_at) = self.with_tx(|tx| {
            require_participant(tx, room_id, sender)?;
            let input = build()?;
            let media_json = serde_json::to_string(input.body.media_urls())?;
            let metadata_json = input.metadata.as_ref().map(serde_json::to_string).transpose()?;

            // Stamped under the lock so timestamps follow commit order.
            let created_at = self.now();
            let now = ts(created_at);

            if let Some(reply_to) = input.reply_to_id {
                match message_room(tx, reply_to)? {
                    None => return Err(ChatError::NotFound(format!("message {}", reply_to))),
                    Some(room) if room != room_id => {
                        return Err(ChatError::validation(
                            "replies must reference a message in the same room",
                        ));
                    }
                    Some(_) => {}
                }
            }
            if let Some(original) = input.forwarded_from_id {
                if message_room(tx, original)?.is_none() {
                    return Err(ChatError::NotFound(format!("message {}", original)));
                }
            }

            tx.execute(
                "INSERT INTO chat_messages
                    (id, room_id, sender_id, message_type, content, media_urls, metadata,
                     reply_to_id, forwarded_from_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    id.to_string(),
                    room_id.to_string(),
                    sender.to_string(),
                    input.body.kind().as_str(),
                    input.body.content(),
                    media_json,
                    metadata_json,
                    input.reply_to_id.map(|u| u.to_string()),
                    input.forwarded_from_id.map(|u| u.to_string()),
                    now
                ],
            )?;

            tx.execute(
                "UPDATE chat_rooms
                 SET last_message_at = ?2, last_message_content = ?3,
                     last_message_sender_id = ?4, updated_at = ?2
                 WHERE id = ?1",
                params![
                    room_id.to_string(),
                    now,
                    input.body.preview(),
                    sender.to_string()
                ],
            )?;

            tx.execute(
                "UPDATE chat_participants SET unread_count = unread_count + 1
                 WHERE room_id = ?1 AND user_id != ?2 AND left_at IS NULL",
                params![room_id.to_string(), sender.to_string()],
            )?;

            Ok((input, created_at))
        })?;

        Ok(ChatMessage {
            id,
            room_id,
            sender_id: sender,
            message_type: input.body.kind(),
            content: input.body.content().map(str::to_string),
            media_urls: input.body.media_urls().to_vec(),
            metadata: input.metadata,
            reply_to_id: input.reply_to_id,
            forwarded_from_id: input.forwarded_from_id,
            created_at,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
            reactions: vec![],
            is_read_by_me: false,
        })
    }

    /// One page of history, oldest first. With a cursor, only messages
    /// strictly older than the cursor message are returned, so repeatedly
    /// passing the oldest id of the previous page walks the whole history
    /// exactly once even while new messages arrive.
    pub fn get_messages(
        &self,
        room_id: Uuid,
        user: Uuid,
        before: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<ChatMessage>> {
        self.with_conn(|conn| {
            require_participant(conn, room_id, user)?;

            let cursor: Option<(String, i64)> = match before {
                None => None,
                Some(cursor_id) => Some(
                    conn.query_row(
                        "SELECT created_at, seq FROM chat_messages WHERE id = ?1 AND room_id = ?2",
                        params![cursor_id.to_string(), room_id.to_string()],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?
                    .ok_or_else(|| ChatError::NotFound(format!("message {}", cursor_id)))?,
                ),
            };
            let (cursor_at, cursor_seq) = match cursor {
                Some((at, seq)) => (Some(at), Some(seq)),
                None => (None, None),
            };

            let sql = format!(
                "SELECT {MESSAGE_COLUMNS},
                    EXISTS(SELECT 1 FROM message_read_receipts rr
                           WHERE rr.message_id = m.id AND rr.user_id = ?2)
                 FROM chat_messages m
                 WHERE m.room_id = ?1 AND m.is_deleted = 0
                   AND (?3 IS NULL OR m.created_at < ?3 OR (m.created_at = ?3 AND m.seq < ?4))
                 ORDER BY m.created_at DESC, m.seq DESC
                 LIMIT ?5"
            );

            let mut stmt = conn.prepare(&sql)?;
            let mut messages = stmt
                .query_map(
                    params![
                        room_id.to_string(),
                        user.to_string(),
                        cursor_at,
                        cursor_seq,
                        limit
                    ],
                    |row| {
                        let mut message = message_from_row(row)?;
                        message.is_read_by_me = row.get(MESSAGE_COLUMN_COUNT)?;
                        Ok(message)
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            messages.reverse();

            let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
            let mut reactions = reactions_for(conn, &ids)?;
            for message in &mut messages {
                message.reactions = reactions.remove(&message.id).unwrap_or_default();
            }

            Ok(messages)
        })
    }

    /// A single message, subject to the same participant rule as history.
    pub fn get_message(&self, message_id: Uuid, user: Uuid) -> Result<ChatMessage> {
        self.with_conn(|conn| {
            let mut message = load_message(conn, message_id)?;
            require_participant(conn, message.room_id, user)?;

            message.is_read_by_me = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM message_read_receipts WHERE message_id = ?1 AND user_id = ?2)",
                params![message_id.to_string(), user.to_string()],
                |row| row.get(0),
            )?;
            message.reactions = reactions_for(conn, &[message_id])?
                .remove(&message_id)
                .unwrap_or_default();
            Ok(message)
        })
    }

    /// Replace the text of the caller's own message.
    pub fn edit_message(&self, message_id: Uuid, user: Uuid, content: &str) -> Result<ChatMessage> {
        let edited_at = self.now();

        self.with_tx(|tx| {
            let mut message = load_message(tx, message_id)?;
            require_participant(tx, message.room_id, user)?;
            if message.sender_id != user {
                return Err(ChatError::Authorization(
                    "only the sender can edit a message".into(),
                ));
            }
            if message.is_deleted {
                return Err(ChatError::NotFound(format!("message {}", message_id)));
            }

            let body = MessageBody::new(
                message.message_type,
                Some(content.to_string()),
                message.media_urls.clone(),
            )?;

            tx.execute(
                "UPDATE chat_messages SET content = ?2, edited_at = ?3 WHERE id = ?1",
                params![message_id.to_string(), body.content(), ts(edited_at)],
            )?;
            // Keep the list-view cache in step when the latest message changes.
            tx.execute(
                "UPDATE chat_rooms SET last_message_content = ?3
                 WHERE id = ?1 AND last_message_at = ?2",
                params![
                    message.room_id.to_string(),
                    ts(message.created_at),
                    body.preview()
                ],
            )?;

            message.content = body.content().map(str::to_string);
            message.edited_at = Some(edited_at);
            Ok(message)
        })
    }

    /// Soft delete of the caller's own message. Returns the room it lived
    /// in. Deleting twice is a no-op.
    pub fn delete_message(&self, message_id: Uuid, user: Uuid) -> Result<Uuid> {
        let now = ts(self.now());

        self.with_tx(|tx| {
            let message = load_message(tx, message_id)?;
            require_participant(tx, message.room_id, user)?;
            if message.sender_id != user {
                return Err(ChatError::Authorization(
                    "only the sender can delete a message".into(),
                ));
            }

            tx.execute(
                "UPDATE chat_messages SET is_deleted = 1, deleted_at = ?2
                 WHERE id = ?1 AND is_deleted = 0",
                params![message_id.to_string(), now],
            )?;
            refresh_last_message(tx, message.room_id)?;
            Ok(message.room_id)
        })
    }

    // -- Read state --

    /// Record read receipts and reset the caller's unread state. With no
    /// ids (or an empty list) every message from someone else in the room
    /// is marked. Deleted messages never get receipts. Returns the number of receipts created.
    pub fn mark_read(&self, room_id: Uuid, user: Uuid, message_ids: Option<&[Uuid]>) -> Result<usize> {
        self.with_tx(|tx| {
            require_participant(tx, room_id, user)?;
            let now = ts(self.now());

            let created = match message_ids {
                Some(ids) if !ids.is_empty() => {
                    let mut stmt = tx.prepare(
                        "INSERT OR IGNORE INTO message_read_receipts (message_id, user_id, read_at)
                         SELECT id, ?2, ?3 FROM chat_messages
                         WHERE id = ?1 AND room_id = ?4 AND is_deleted = 0",
                    )?;
                    let mut created = 0;
                    for id in ids {
                        created += stmt.execute(params![
                            id.to_string(),
                            user.to_string(),
                            now,
                            room_id.to_string()
                        ])?;
                    }
                    created
                }
                _ => tx.execute(
                    "INSERT OR IGNORE INTO message_read_receipts (message_id, user_id, read_at)
                     SELECT id, ?2, ?3 FROM chat_messages
                     WHERE room_id = ?1 AND sender_id != ?2 AND is_deleted = 0",
                    params![room_id.to_string(), user.to_string(), now],
                )?,
            };

            tx.execute(
                "UPDATE chat_participants SET unread_count = 0, last_read_at = ?3
                 WHERE room_id = ?1 AND user_id = ?2",
                params![room_id.to_string(), user.to_string(), now],
            )?;

            Ok(created)
        })
    }

    /// The materialized unread counter of an active participant.
    pub fn unread_count(&self, room_id: Uuid, user: Uuid) -> Result<i64> {
        self.with_conn(|conn| {
            require_participant(conn, room_id, user)?;
            Ok(conn.query_row(
                "SELECT unread_count FROM chat_participants WHERE room_id = ?1 AND user_id = ?2",
                params![room_id.to_string(), user.to_string()],
                |row| row.get(0),
            )?)
        })
    }

    /// Unread count recomputed from the messages themselves: messages by
    /// others created after the participant's `last_read_at`. Always equal
    /// to `unread_count` for an active participant.
    pub fn derive_unread_count(&self, room_id: Uuid, user: Uuid) -> Result<i64> {
        self.with_conn(|conn| {
            require_participant(conn, room_id, user)?;
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM chat_messages m
                 JOIN chat_participants p ON p.room_id = m.room_id AND p.user_id = ?2
                 WHERE m.room_id = ?1 AND m.sender_id != ?2
                   AND (p.last_read_at IS NULL OR m.created_at > p.last_read_at)",
                params![room_id.to_string(), user.to_string()],
                |row| row.get(0),
            )?)
        })
    }

    // -- Reactions --

    /// Add a reaction. Returns the message's room and whether a row was
    /// inserted; repeating the same (message, user, emoji) is a no-op.
    pub fn react_to_message(&self, message_id: Uuid, user: Uuid, emoji: &str) -> Result<(Uuid, bool)> {
        let emoji = validate_emoji(emoji)?;
        let now = ts(self.now());

        self.with_tx(|tx| {
            let room_id = reactable_room(tx, message_id, user)?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO message_reactions (message_id, user_id, emoji, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![message_id.to_string(), user.to_string(), emoji, now],
            )?;
            Ok((room_id, inserted == 1))
        })
    }

    /// Remove a reaction. Returns the message's room and whether a row was
    /// deleted.
    pub fn remove_reaction(&self, message_id: Uuid, user: Uuid, emoji: &str) -> Result<(Uuid, bool)> {
        let emoji = validate_emoji(emoji)?;

        self.with_tx(|tx| {
            let room_id = reactable_room(tx, message_id, user)?;
            let deleted = tx.execute(
                "DELETE FROM message_reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                params![message_id.to_string(), user.to_string(), emoji],
            )?;
            Ok((room_id, deleted == 1))
        })
    }
}

fn validate_emoji(emoji: &str) -> Result<&str> {
    let emoji = emoji.trim();
    if emoji.is_empty() {
        return Err(ChatError::validation("emoji must not be empty"));
    }
    if emoji.chars().count() > MAX_EMOJI_CHARS {
        return Err(ChatError::validation("emoji is too long"));
    }
    Ok(emoji)
}

fn reactable_room(conn: &Connection, message_id: Uuid, user: Uuid) -> Result<Uuid> {
    let message = load_message(conn, message_id)?;
    if message.is_deleted {
        return Err(ChatError::NotFound(format!("message {}", message_id)));
    }
    require_participant(conn, message.room_id, user)?;
    Ok(message.room_id)
}

/// Point the room's list-view cache at its newest visible message, or
/// clear it when nothing visible is left.
fn refresh_last_message(conn: &Connection, room_id: Uuid) -> Result<()> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM chat_messages m
         WHERE m.room_id = ?1 AND m.is_deleted = 0
         ORDER BY m.created_at DESC, m.seq DESC
         LIMIT 1"
    );
    let latest = conn
        .query_row(&sql, [room_id.to_string()], message_from_row)
        .optional()?;

    let (at, preview, sender) = match latest {
        Some(m) => {
            let body = MessageBody::new(m.message_type, m.content, m.media_urls)?;
            (Some(ts(m.created_at)), Some(body.preview()), Some(m.sender_id.to_string()))
        }
        None => (None, None, None),
    };
    conn.execute(
        "UPDATE chat_rooms
         SET last_message_at = ?2, last_message_content = ?3, last_message_sender_id = ?4
         WHERE id = ?1",
        params![room_id.to_string(), at, preview, sender],
    )?;
    Ok(())
}

fn message_room(conn: &Connection, message_id: Uuid) -> Result<Option<Uuid>> {
    let room = conn
        .query_row(
            "SELECT room_id FROM chat_messages WHERE id = ?1",
            [message_id.to_string()],
            |row| get_uuid(row, 0),
        )
        .optional()?;
    Ok(room)
}

fn load_message(conn: &Connection, message_id: Uuid) -> Result<ChatMessage> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM chat_messages m WHERE m.id = ?1");
    conn.query_row(&sql, [message_id.to_string()], message_from_row)
        .optional()?
        .ok_or_else(|| ChatError::NotFound(format!("message {}", message_id)))
}

/// Batch-fetch reactions for a set of messages, grouped per emoji in the
/// order each emoji was first used.
fn reactions_for(conn: &Connection, message_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<ReactionGroup>>> {
    if message_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT message_id, user_id, emoji FROM message_reactions
         WHERE message_id IN ({})
         ORDER BY created_at ASC",
        placeholders.join(", ")
    );

    let ids: Vec<String> = message_ids.iter().map(|id| id.to_string()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(ids.iter()), |row| {
            Ok((get_uuid(row, 0)?, get_uuid(row, 1)?, row.get::<_, String>(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut grouped: HashMap<Uuid, Vec<ReactionGroup>> = HashMap::new();
    for (message_id, user_id, emoji) in rows {
        let groups = grouped.entry(message_id).or_default();
        match groups.iter_mut().find(|g| g.emoji == emoji) {
            Some(group) => {
                group.count += 1;
                group.user_ids.push(user_id);
            }
            None => groups.push(ReactionGroup {
                emoji,
                count: 1,
                user_ids: vec![user_id],
            }),
        }
    }

    Ok(grouped)
}

#[cfg(test)]
mod tests {
    use huddle_types::api::CreateGroupRoomRequest;
    use huddle_types::models::MessageKind;

    use super::*;

    fn setup() -> (Database, Uuid, Uuid, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let room = db.get_or_create_direct_room(a, b).unwrap();
        (db, room.id, a, b)
    }

    fn text(content: &str) -> NewMessage {
        NewMessage::text(content).unwrap()
    }

    fn message_count(db: &Database) -> i64 {
        db.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM chat_messages", [], |row| row.get(0))?)
        })
        .unwrap()
    }

    #[test]
    fn send_updates_cache_and_unread() {
        let (db, room, a, b) = setup();

        let sent = db.send_message(room, a, text("hi")).unwrap();
        assert_eq!(sent.content.as_deref(), Some("hi"));
        assert_eq!(sent.message_type, MessageKind::Text);

        let rooms = db.list_rooms_for_user(b, 0, 10).unwrap();
        assert_eq!(rooms[0].room.last_message_content.as_deref(), Some("hi"));
        assert_eq!(rooms[0].room.last_message_sender_id, Some(a));
        assert_eq!(rooms[0].room.last_message_at, Some(sent.created_at));
        assert_eq!(rooms[0].membership.unread_count, 1);

        assert_eq!(db.unread_count(room, a).unwrap(), 0);
        assert_eq!(db.unread_count(room, b).unwrap(), 1);
    }

    #[test]
    fn non_participant_cannot_send() {
        let (db, room, _, _) = setup();
        let stranger = Uuid::new_v4();

        let err = db.send_message(room, stranger, text("let me in")).unwrap_err();
        assert!(matches!(err, ChatError::Authorization(_)));
        assert_eq!(message_count(&db), 0);
    }

    #[test]
    fn left_participant_cannot_send_or_read() {
        let (db, room, a, b) = setup();
        db.leave_room(room, b).unwrap();

        assert!(matches!(
            db.send_message(room, b, text("still here?")),
            Err(ChatError::Authorization(_))
        ));
        assert!(matches!(
            db.get_messages(room, b, None, 50),
            Err(ChatError::Authorization(_))
        ));

        // Left users no longer accumulate unread messages.
        db.send_message(room, a, text("bye")).unwrap();
        let unread: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT unread_count FROM chat_participants WHERE room_id = ?1 AND user_id = ?2",
                    params![room.to_string(), b.to_string()],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(unread, 0);
    }

    #[test]
    fn reply_must_stay_in_room() {
        let (db, room, a, _) = setup();
        let other_room = db.get_or_create_direct_room(a, Uuid::new_v4()).unwrap();
        let elsewhere = db.send_message(other_room.id, a, text("elsewhere")).unwrap();

        let mut reply = text("re");
        reply.reply_to_id = Some(elsewhere.id);
        assert!(matches!(
            db.send_message(room, a, reply),
            Err(ChatError::Validation(_))
        ));

        let mut reply = text("re");
        reply.reply_to_id = Some(Uuid::new_v4());
        assert!(matches!(
            db.send_message(room, a, reply),
            Err(ChatError::NotFound(_))
        ));

        let original = db.send_message(room, a, text("original")).unwrap();
        let mut reply = text("re");
        reply.reply_to_id = Some(original.id);
        let sent = db.send_message(room, a, reply).unwrap();
        assert_eq!(sent.reply_to_id, Some(original.id));
    }

    #[test]
    fn pagination_walks_history_once() {
        let (db, room, a, b) = setup();
        let mut sent = Vec::new();
        for i in 0..23 {
            let sender = if i % 3 == 0 { b } else { a };
            sent.push(db.send_message(room, sender, text(&format!("m{}", i))).unwrap().id);
        }

        let mut pages: Vec<Vec<Uuid>> = Vec::new();
        let mut cursor = None;
        loop {
            let page = db.get_messages(room, a, cursor, 5).unwrap();
            if page.is_empty() {
                break;
            }
            assert!(page.windows(2).all(|w| w[0].created_at < w[1].created_at));
            cursor = Some(page[0].id);
            pages.push(page.into_iter().map(|m| m.id).collect());
        }

        assert_eq!(pages.len(), 5);
        let history: Vec<Uuid> = pages.into_iter().rev().flatten().collect();
        assert_eq!(history, sent);
    }

    #[test]
    fn cursor_from_another_room_is_not_found() {
        let (db, room, a, _) = setup();
        let other = db.get_or_create_direct_room(a, Uuid::new_v4()).unwrap();
        let foreign = db.send_message(other.id, a, text("x")).unwrap();

        assert!(matches!(
            db.get_messages(room, a, Some(foreign.id), 10),
            Err(ChatError::NotFound(_))
        ));
    }

    #[test]
    fn mark_read_all_resets_unread() {
        let (db, room, a, b) = setup();
        for i in 0..4 {
            db.send_message(room, a, text(&format!("m{}", i))).unwrap();
        }
        db.send_message(room, b, text("mine")).unwrap();

        assert_eq!(db.unread_count(room, b).unwrap(), 4);
        assert_eq!(db.derive_unread_count(room, b).unwrap(), 4);

        let created = db.mark_read(room, b, None).unwrap();
        assert_eq!(created, 4);
        assert_eq!(db.mark_read(room, b, None).unwrap(), 0);

        let history = db.get_messages(room, b, None, 50).unwrap();
        assert!(history.iter().filter(|m| m.sender_id == a).all(|m| m.is_read_by_me));
        assert!(!history.iter().find(|m| m.sender_id == b).unwrap().is_read_by_me);

        assert_eq!(db.unread_count(room, b).unwrap(), 0);
        assert_eq!(db.derive_unread_count(room, b).unwrap(), 0);
    }

    #[test]
    fn mark_read_specific_ids() {
        let (db, room, a, b) = setup();
        let first = db.send_message(room, a, text("one")).unwrap();
        db.send_message(room, a, text("two")).unwrap();

        let foreign_room = db.get_or_create_direct_room(a, Uuid::new_v4()).unwrap();
        let foreign = db.send_message(foreign_room.id, a, text("other")).unwrap();

        let created = db.mark_read(room, b, Some(&[first.id, first.id, foreign.id])).unwrap();
        assert_eq!(created, 1);
        assert_eq!(db.unread_count(room, b).unwrap(), 0);

        let history = db.get_messages(room, b, None, 50).unwrap();
        assert!(history[0].is_read_by_me);
        assert!(!history[1].is_read_by_me);
    }

    #[test]
    fn unread_invariant_holds_across_group_activity() {
        let db = Database::open_in_memory().unwrap();
        let users: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let room = db
            .create_group_room(
                users[0],
                &CreateGroupRoomRequest {
                    name: "Crew".into(),
                    description: None,
                    image_url: None,
                    participant_ids: users[1..].to_vec(),
                },
            )
            .unwrap();

        for round in 0..12 {
            let sender = users[round % users.len()];
            db.send_message(room.id, sender, text(&format!("r{}", round))).unwrap();
            if round % 5 == 0 {
                db.mark_read(room.id, users[(round + 1) % users.len()], None).unwrap();
            }
            for user in &users {
                assert_eq!(
                    db.unread_count(room.id, *user).unwrap(),
                    db.derive_unread_count(room.id, *user).unwrap()
                );
            }
        }
    }

    #[test]
    fn reactions_are_idempotent() {
        let (db, room, a, b) = setup();
        let msg = db.send_message(room, a, text("pr!")).unwrap();

        assert_eq!(db.react_to_message(msg.id, b, "💪").unwrap(), (room, true));
        assert_eq!(db.react_to_message(msg.id, b, "💪").unwrap(), (room, false));
        assert!(db.react_to_message(msg.id, b, "🔥").unwrap().1);
        assert!(db.react_to_message(msg.id, a, "💪").unwrap().1);

        let fetched = db.get_message(msg.id, a).unwrap();
        assert_eq!(fetched.reactions.len(), 2);
        assert_eq!(fetched.reactions[0].emoji, "💪");
        assert_eq!(fetched.reactions[0].count, 2);
        assert_eq!(fetched.reactions[1].user_ids, vec![b]);

        assert!(db.remove_reaction(msg.id, b, "💪").unwrap().1);
        assert!(!db.remove_reaction(msg.id, b, "💪").unwrap().1);
        assert!(matches!(
            db.react_to_message(msg.id, b, "  "),
            Err(ChatError::Validation(_))
        ));
        assert!(matches!(
            db.react_to_message(msg.id, Uuid::new_v4(), "👍"),
            Err(ChatError::Authorization(_))
        ));
    }

    #[test]
    fn deleted_messages_are_suppressed() {
        let (db, room, a, b) = setup();
        let keep = db.send_message(room, a, text("keep")).unwrap();
        let gone = db.send_message(room, a, text("oops")).unwrap();

        assert!(matches!(
            db.delete_message(gone.id, b),
            Err(ChatError::Authorization(_))
        ));
        assert_eq!(db.delete_message(gone.id, a).unwrap(), room);
        assert_eq!(db.delete_message(gone.id, a).unwrap(), room);

        let history = db.get_messages(room, b, None, 50).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, keep.id);

        let fetched = db.get_message(gone.id, a).unwrap();
        assert!(fetched.is_deleted);
        assert!(fetched.deleted_at.is_some());
        assert!(fetched.content.is_none());
        assert_eq!(message_count(&db), 2);
    }

    #[test]
    fn deleting_latest_message_refreshes_room_preview() {
        let (db, room, a, b) = setup();
        let keep = db.send_message(room, a, text("keep")).unwrap();
        let gone = db.send_message(room, b, text("secret oops")).unwrap();

        db.delete_message(gone.id, b).unwrap();
        let rooms = db.list_rooms_for_user(a, 0, 10).unwrap();
        assert_eq!(rooms[0].room.last_message_content.as_deref(), Some("keep"));
        assert_eq!(rooms[0].room.last_message_sender_id, Some(a));
        assert_eq!(rooms[0].room.last_message_at, Some(keep.created_at));

        db.delete_message(keep.id, a).unwrap();
        let rooms = db.list_rooms_for_user(b, 0, 10).unwrap();
        assert_eq!(rooms.len(), 1);
        assert!(rooms[0].room.last_message_content.is_none());
        assert!(rooms[0].room.last_message_sender_id.is_none());
    }

    #[test]
    fn outsider_is_rejected_before_input_is_validated() {
        let (db, room, a, _) = setup();
        let invalid = SendMessageRequest {
            message_type: "image".into(),
            ..Default::default()
        };

        let err = db.send_request(room, Uuid::new_v4(), invalid.clone()).unwrap_err();
        assert!(matches!(err, ChatError::Authorization(_)));
        assert!(matches!(
            db.send_request(room, a, invalid),
            Err(ChatError::Validation(_))
        ));
        assert_eq!(message_count(&db), 0);

        let ok = SendMessageRequest {
            content: Some("hello".into()),
            message_type: "text".into(),
            ..Default::default()
        };
        assert_eq!(db.send_request(room, a, ok).unwrap().content.as_deref(), Some("hello"));
    }

    #[test]
    fn deleted_messages_get_no_receipts() {
        let (db, room, a, b) = setup();
        db.send_message(room, a, text("one")).unwrap();
        let gone = db.send_message(room, a, text("two")).unwrap();
        db.delete_message(gone.id, a).unwrap();

        assert_eq!(db.mark_read(room, b, Some(&[gone.id])).unwrap(), 0);
        assert_eq!(db.mark_read(room, b, None).unwrap(), 1);
        assert_eq!(db.unread_count(room, b).unwrap(), 0);
        assert_eq!(db.derive_unread_count(room, b).unwrap(), 0);
    }

    #[test]
    fn edit_is_sender_only_and_validated() {
        let (db, room, a, b) = setup();
        let msg = db.send_message(room, a, text("5k in 30")).unwrap();

        assert!(matches!(
            db.edit_message(msg.id, b, "nope"),
            Err(ChatError::Authorization(_))
        ));
        assert!(matches!(
            db.edit_message(msg.id, a, "   "),
            Err(ChatError::Validation(_))
        ));

        let edited = db.edit_message(msg.id, a, "5k in 28").unwrap();
        assert_eq!(edited.content.as_deref(), Some("5k in 28"));
        assert!(edited.edited_at.is_some());

        let rooms = db.list_rooms_for_user(b, 0, 10).unwrap();
        assert_eq!(rooms[0].room.last_message_content.as_deref(), Some("5k in 28"));
    }
}
