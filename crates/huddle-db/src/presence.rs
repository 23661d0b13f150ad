use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use huddle_types::models::Presence;

use crate::models::{get_opt_time, ts};
use crate::{Database, Result};

impl Database {
    /// Upsert a user's presence. `last_seen` only moves when the user goes
    /// offline; coming online keeps the previous value.
    pub fn set_presence(&self, user: Uuid, online: bool) -> Result<Presence> {
        self.with_conn(|conn| {
            let now = ts(self.now());
            let last_seen = (!online).then_some(now.as_str());

            conn.execute(
                "INSERT INTO user_presence (user_id, is_online, last_seen, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET
                    is_online = excluded.is_online,
                    last_seen = COALESCE(excluded.last_seen, user_presence.last_seen),
                    updated_at = excluded.updated_at",
                params![user.to_string(), online, last_seen, now],
            )?;

            load_presence(conn, user)
        })
    }

    /// Presence of a user; users never seen are reported offline.
    pub fn get_presence(&self, user: Uuid) -> Result<Presence> {
        self.with_conn(|conn| load_presence(conn, user))
    }
}

fn load_presence(conn: &rusqlite::Connection, user: Uuid) -> Result<Presence> {
    let found = conn
        .query_row(
            "SELECT is_online, last_seen FROM user_presence WHERE user_id = ?1",
            [user.to_string()],
            |row| {
                Ok(Presence {
                    user_id: user,
                    is_online: row.get(0)?,
                    last_seen: get_opt_time(row, 1)?,
                })
            },
        )
        .optional()?;

    Ok(found.unwrap_or(Presence {
        user_id: user,
        is_online: false,
        last_seen: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_user_is_offline() {
        let db = Database::open_in_memory().unwrap();
        let p = db.get_presence(Uuid::new_v4()).unwrap();
        assert!(!p.is_online);
        assert!(p.last_seen.is_none());
    }

    #[test]
    fn last_seen_moves_only_when_going_offline() {
        let db = Database::open_in_memory().unwrap();
        let user = Uuid::new_v4();

        let online = db.set_presence(user, true).unwrap();
        assert!(online.is_online);
        assert!(online.last_seen.is_none());

        let offline = db.set_presence(user, false).unwrap();
        assert!(!offline.is_online);
        let seen = offline.last_seen.unwrap();

        let back = db.set_presence(user, true).unwrap();
        assert!(back.is_online);
        assert_eq!(back.last_seen, Some(seen));

        let again = db.set_presence(user, false).unwrap();
        assert!(again.last_seen.unwrap() > seen);
        assert_eq!(db.get_presence(user).unwrap(), again);
    }
}
