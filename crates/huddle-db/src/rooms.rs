use std::collections::BTreeSet;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;
use uuid::Uuid;

use huddle_types::api::CreateGroupRoomRequest;
use huddle_types::models::{
    Membership, ParticipantRole, ParticipantView, Room, RoomDetail, RoomKind, RoomSummary,
};

use crate::models::{
    MEMBERSHIP_COLUMNS, ROOM_COLUMN_COUNT, ROOM_COLUMNS, direct_key, get_opt_time, get_parsed,
    get_time, get_uuid, membership_from_row, room_from_row, ts,
};
use crate::{ChatError, Database, Result};

impl Database {
    // -- Room creation --

    /// Return the direct room for the unordered pair, creating it with both
    /// users as participants if it does not exist yet. The `direct_key`
    /// unique constraint makes concurrent calls converge on one room.
    pub fn get_or_create_direct_room(&self, user_a: Uuid, user_b: Uuid) -> Result<Room> {
        if user_a == user_b {
            return Err(ChatError::validation(
                "cannot open a direct conversation with yourself",
            ));
        }

        let key = direct_key(user_a, user_b);

        self.with_tx(|tx| {
            let now = ts(self.now());
            let candidate = Uuid::new_v4().to_string();
            let inserted = tx.execute(
                "INSERT INTO chat_rooms (id, room_type, created_by, direct_key, created_at, updated_at)
                 VALUES (?1, 'direct', ?2, ?3, ?4, ?4)
                 ON CONFLICT(direct_key) DO NOTHING",
                params![candidate, user_a.to_string(), key, now],
            )?;

            let room_id: String = tx.query_row(
                "SELECT id FROM chat_rooms WHERE direct_key = ?1",
                [&key],
                |row| row.get(0),
            )?;

            if inserted == 1 {
                for user in [user_a, user_b] {
                    insert_participant(tx, &room_id, user, ParticipantRole::Member, &now)?;
                }
                info!("Created direct room {} for {} and {}", room_id, user_a, user_b);
            } else {
                // Reopening restores both sides; a direct room always has
                // exactly two active participants.
                tx.execute(
                    "UPDATE chat_participants
                     SET left_at = NULL, last_read_at = ?2, unread_count = 0
                     WHERE room_id = ?1 AND left_at IS NOT NULL",
                    params![room_id, now],
                )?;
                tx.execute(
                    "UPDATE chat_rooms SET is_archived = 0 WHERE id = ?1",
                    [&room_id],
                )?;
            }

            load_room(tx, &room_id)?.ok_or_else(|| ChatError::NotFound(format!("room {}", room_id)))
        })
    }

    /// Create a group room. The creator always becomes its admin.
    pub fn create_group_room(&self, creator: Uuid, req: &CreateGroupRoomRequest) -> Result<Room> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(ChatError::validation("group name must not be blank"));
        }

        let others: BTreeSet<Uuid> = req
            .participant_ids
            .iter()
            .copied()
            .filter(|id| *id != creator)
            .collect();
        if others.is_empty() {
            return Err(ChatError::validation(
                "a group needs at least one other participant",
            ));
        }

        let room_id = Uuid::new_v4().to_string();

        self.with_tx(|tx| {
            let now = ts(self.now());
            tx.execute(
                "INSERT INTO chat_rooms (id, room_type, name, description, image_url, created_by, created_at, updated_at)
                 VALUES (?1, 'group', ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    room_id,
                    name,
                    req.description,
                    req.image_url,
                    creator.to_string(),
                    now
                ],
            )?;

            insert_participant(tx, &room_id, creator, ParticipantRole::Admin, &now)?;
            for user in &others {
                insert_participant(tx, &room_id, *user, ParticipantRole::Member, &now)?;
            }

            info!(
                "Created group room {} ({}) with {} participants",
                room_id,
                name,
                others.len() + 1
            );
            load_room(tx, &room_id)?.ok_or_else(|| ChatError::NotFound(format!("room {}", room_id)))
        })
    }

    // -- Room queries --

    /// Rooms the user actively participates in, pinned first, then by most
    /// recent activity. Archived rooms are left out.
    pub fn list_rooms_for_user(&self, user: Uuid, skip: u32, limit: u32) -> Result<Vec<RoomSummary>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {ROOM_COLUMNS}, {MEMBERSHIP_COLUMNS},
                    (SELECT COUNT(*) FROM chat_participants c
                     WHERE c.room_id = r.id AND c.left_at IS NULL)
                 FROM chat_rooms r
                 JOIN chat_participants p ON p.room_id = r.id
                 WHERE p.user_id = ?1 AND p.left_at IS NULL AND r.is_archived = 0
                 ORDER BY p.is_pinned DESC, COALESCE(r.last_message_at, r.created_at) DESC
                 LIMIT ?2 OFFSET ?3"
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![user.to_string(), limit, skip], |row| {
                    Ok(RoomSummary {
                        room: room_from_row(row, 0)?,
                        membership: membership_from_row(row, ROOM_COLUMN_COUNT)?,
                        participant_count: row.get(ROOM_COLUMN_COUNT + 5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Room metadata plus the active participants with their presence.
    /// Profile fields are left empty for the caller to fill in.
    pub fn get_room_detail(&self, room_id: Uuid, user: Uuid) -> Result<RoomDetail> {
        self.with_conn(|conn| {
            require_participant(conn, room_id, user)?;

            let room = load_room(conn, &room_id.to_string())?
                .ok_or_else(|| ChatError::NotFound(format!("room {}", room_id)))?;
            let membership = load_membership(conn, room_id, user)?.ok_or_else(ChatError::not_participant)?;

            let mut stmt = conn.prepare(
                "SELECT p.user_id, p.role, p.joined_at, p.last_read_at,
                        COALESCE(up.is_online, 0), up.last_seen
                 FROM chat_participants p
                 LEFT JOIN user_presence up ON up.user_id = p.user_id
                 WHERE p.room_id = ?1 AND p.left_at IS NULL
                 ORDER BY p.role = 'admin' DESC, p.joined_at ASC",
            )?;
            let participants = stmt
                .query_map([room_id.to_string()], |row| {
                    Ok(ParticipantView {
                        user_id: get_uuid(row, 0)?,
                        role: get_parsed(row, 1)?,
                        joined_at: get_time(row, 2)?,
                        last_read_at: get_opt_time(row, 3)?,
                        is_online: row.get(4)?,
                        last_seen: get_opt_time(row, 5)?,
                        display_name: None,
                        avatar_url: None,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(RoomDetail {
                room,
                membership,
                participants,
            })
        })
    }

    /// Ids of the users with an active participant row in the room.
    pub fn active_participant_ids(&self, room_id: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM chat_participants WHERE room_id = ?1 AND left_at IS NULL",
            )?;
            let ids = stmt
                .query_map([room_id.to_string()], |row| get_uuid(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    // -- Membership --

    /// Add a user to a group room. Only admins may add; a user who left
    /// earlier is reactivated. Returns false if they were already active.
    pub fn add_participant(&self, room_id: Uuid, acting: Uuid, new_user: Uuid) -> Result<bool> {
        self.with_tx(|tx| {
            let now = ts(self.now());
            let role = require_participant(tx, room_id, acting)?;
            let kind = room_kind(tx, room_id)?;
            if kind != RoomKind::Group {
                return Err(ChatError::validation(
                    "participants can only be added to group rooms",
                ));
            }
            if role != ParticipantRole::Admin {
                return Err(ChatError::Authorization(
                    "only group admins can add participants".into(),
                ));
            }

            let changed = tx.execute(
                "INSERT INTO chat_participants (room_id, user_id, role, joined_at, last_read_at)
                 VALUES (?1, ?2, 'member', ?3, ?3)
                 ON CONFLICT(room_id, user_id) DO UPDATE SET
                    left_at = NULL,
                    role = 'member',
                    joined_at = excluded.joined_at,
                    last_read_at = excluded.last_read_at,
                    unread_count = 0
                 WHERE chat_participants.left_at IS NOT NULL",
                params![room_id.to_string(), new_user.to_string(), now],
            )?;

            if changed > 0 {
                info!("{} added {} to room {}", acting, new_user, room_id);
            }
            Ok(changed > 0)
        })
    }

    /// Soft leave: the row stays for history but no longer authorizes
    /// reads or writes, and the user stops receiving unread increments.
    pub fn leave_room(&self, room_id: Uuid, user: Uuid) -> Result<()> {
        self.with_tx(|tx| {
            let now = ts(self.now());
            require_participant(tx, room_id, user)?;
            tx.execute(
                "UPDATE chat_participants SET left_at = ?3
                 WHERE room_id = ?1 AND user_id = ?2 AND left_at IS NULL",
                params![room_id.to_string(), user.to_string(), now],
            )?;
            info!("{} left room {}", user, room_id);
            Ok(())
        })
    }

    pub fn update_preferences(
        &self,
        room_id: Uuid,
        user: Uuid,
        muted: Option<bool>,
        pinned: Option<bool>,
    ) -> Result<Membership> {
        self.with_tx(|tx| {
            require_participant(tx, room_id, user)?;
            tx.execute(
                "UPDATE chat_participants
                 SET is_muted = COALESCE(?3, is_muted), is_pinned = COALESCE(?4, is_pinned)
                 WHERE room_id = ?1 AND user_id = ?2",
                params![room_id.to_string(), user.to_string(), muted, pinned],
            )?;
            load_membership(tx, room_id, user)?.ok_or_else(ChatError::not_participant)
        })
    }

    /// Archive a room. Group rooms need an admin; either side of a direct
    /// room may archive it.
    pub fn archive_room(&self, room_id: Uuid, user: Uuid) -> Result<()> {
        self.with_tx(|tx| {
            let now = ts(self.now());
            let role = require_participant(tx, room_id, user)?;
            if room_kind(tx, room_id)? == RoomKind::Group && role != ParticipantRole::Admin {
                return Err(ChatError::Authorization(
                    "only group admins can archive the room".into(),
                ));
            }
            tx.execute(
                "UPDATE chat_rooms SET is_archived = 1, updated_at = ?2 WHERE id = ?1",
                params![room_id.to_string(), now],
            )?;
            info!("{} archived room {}", user, room_id);
            Ok(())
        })
    }
}

fn insert_participant(
    conn: &Connection,
    room_id: &str,
    user: Uuid,
    role: ParticipantRole,
    now: &str,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO chat_participants (room_id, user_id, role, joined_at, last_read_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![room_id, user.to_string(), role.as_str(), now],
    )?;
    Ok(())
}

pub(crate) fn load_room(conn: &Connection, room_id: &str) -> Result<Option<Room>> {
    let sql = format!("SELECT {ROOM_COLUMNS} FROM chat_rooms r WHERE r.id = ?1");
    let room = conn
        .query_row(&sql, [room_id], |row| room_from_row(row, 0))
        .optional()?;
    Ok(room)
}

fn load_membership(conn: &Connection, room_id: Uuid, user: Uuid) -> Result<Option<Membership>> {
    let sql = format!(
        "SELECT {MEMBERSHIP_COLUMNS} FROM chat_participants p
         WHERE p.room_id = ?1 AND p.user_id = ?2 AND p.left_at IS NULL"
    );
    let membership = conn
        .query_row(&sql, params![room_id.to_string(), user.to_string()], |row| {
            membership_from_row(row, 0)
        })
        .optional()?;
    Ok(membership)
}

fn room_kind(conn: &Connection, room_id: Uuid) -> Result<RoomKind> {
    conn.query_row(
        "SELECT room_type FROM chat_rooms WHERE id = ?1",
        [room_id.to_string()],
        |row| get_parsed(row, 0),
    )
    .optional()?
    .ok_or_else(|| ChatError::NotFound(format!("room {}", room_id)))
}

/// The authorization rule: only users with an active participant row may
/// act on a room. Unknown rooms are reported as not found.
pub(crate) fn require_participant(
    conn: &Connection,
    room_id: Uuid,
    user: Uuid,
) -> Result<ParticipantRole> {
    let room_exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM chat_rooms WHERE id = ?1)",
        [room_id.to_string()],
        |row| row.get(0),
    )?;
    if !room_exists {
        return Err(ChatError::NotFound(format!("room {}", room_id)));
    }

    conn.query_row(
        "SELECT role FROM chat_participants
         WHERE room_id = ?1 AND user_id = ?2 AND left_at IS NULL",
        params![room_id.to_string(), user.to_string()],
        |row| get_parsed(row, 0),
    )
    .optional()?
    .ok_or_else(ChatError::not_participant)
}
