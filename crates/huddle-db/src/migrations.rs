use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS chat_rooms (
            id                      TEXT PRIMARY KEY,
            room_type               TEXT NOT NULL CHECK (room_type IN ('direct', 'group')),
            name                    TEXT,
            description             TEXT,
            image_url               TEXT,
            created_by              TEXT NOT NULL,
            -- 'low:high' user ids for direct rooms, NULL for groups
            direct_key              TEXT UNIQUE,
            created_at              TEXT NOT NULL,
            updated_at              TEXT NOT NULL,
            last_message_at         TEXT,
            last_message_content    TEXT,
            last_message_sender_id  TEXT,
            is_archived             INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS chat_participants (
            room_id         TEXT NOT NULL REFERENCES chat_rooms(id) ON DELETE CASCADE,
            user_id         TEXT NOT NULL,
            role            TEXT NOT NULL DEFAULT 'member' CHECK (role IN ('member', 'admin')),
            joined_at       TEXT NOT NULL,
            left_at         TEXT,
            last_read_at    TEXT,
            unread_count    INTEGER NOT NULL DEFAULT 0,
            is_muted        INTEGER NOT NULL DEFAULT 0,
            is_pinned       INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (room_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_chat_participants_user
            ON chat_participants(user_id);

        CREATE TABLE IF NOT EXISTS chat_messages (
            seq                 INTEGER PRIMARY KEY AUTOINCREMENT,
            id                  TEXT NOT NULL UNIQUE,
            room_id             TEXT NOT NULL REFERENCES chat_rooms(id) ON DELETE CASCADE,
            sender_id           TEXT NOT NULL,
            message_type        TEXT NOT NULL,
            content             TEXT,
            media_urls          TEXT NOT NULL DEFAULT '[]',
            metadata            TEXT,
            reply_to_id         TEXT REFERENCES chat_messages(id) ON DELETE SET NULL,
            forwarded_from_id   TEXT REFERENCES chat_messages(id) ON DELETE SET NULL,
            created_at          TEXT NOT NULL,
            edited_at           TEXT,
            is_deleted          INTEGER NOT NULL DEFAULT 0,
            deleted_at          TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_chat_messages_room
            ON chat_messages(room_id, created_at, seq);

        CREATE TABLE IF NOT EXISTS message_reactions (
            message_id  TEXT NOT NULL REFERENCES chat_messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            PRIMARY KEY (message_id, user_id, emoji)
        );

        CREATE TABLE IF NOT EXISTS message_read_receipts (
            message_id  TEXT NOT NULL REFERENCES chat_messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            read_at     TEXT NOT NULL,
            PRIMARY KEY (message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS user_presence (
            user_id     TEXT PRIMARY KEY,
            is_online   INTEGER NOT NULL DEFAULT 0,
            last_seen   TEXT,
            updated_at  TEXT NOT NULL
        );

        -- Owned by the social graph and profile services; read here for
        -- direct-room permission, presence fan-out and display enrichment.
        CREATE TABLE IF NOT EXISTS contacts (
            user_id     TEXT NOT NULL,
            contact_id  TEXT NOT NULL,
            status      TEXT NOT NULL CHECK (status IN ('accepted', 'blocked')),
            PRIMARY KEY (user_id, contact_id)
        );

        CREATE INDEX IF NOT EXISTS idx_contacts_contact
            ON contacts(contact_id);

        CREATE TABLE IF NOT EXISTS profiles (
            user_id         TEXT PRIMARY KEY,
            display_name    TEXT,
            avatar_url      TEXT
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
