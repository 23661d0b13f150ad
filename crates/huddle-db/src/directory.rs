//! Read side of the social graph and the profile directory.
//!
//! Both are owned by other services. The chat core only asks the questions
//! below, so they sit behind traits; the SQLite-backed implementations read
//! the `contacts` and `profiles` tables those services keep in sync.

use std::collections::HashMap;

use rusqlite::params;
use uuid::Uuid;

use huddle_types::models::Profile;

use crate::models::get_uuid;
use crate::{Database, Result};

pub trait SocialGraph: Send + Sync {
    /// Whether `from` may open a direct conversation with `to`.
    fn can_message(&self, from: Uuid, to: Uuid) -> Result<bool>;

    /// Users who receive presence changes of `user`.
    fn friends_of(&self, user: Uuid) -> Result<Vec<Uuid>>;
}

pub trait ProfileDirectory: Send + Sync {
    /// Profiles for the given users. Users without a profile are absent
    /// from the map.
    fn profiles(&self, users: &[Uuid]) -> Result<HashMap<Uuid, Profile>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactStatus {
    Accepted,
    Blocked,
}

impl ContactStatus {
    fn as_str(&self) -> &'static str {
        match self {
            ContactStatus::Accepted => "accepted",
            ContactStatus::Blocked => "blocked",
        }
    }
}

impl Database {
    /// Record `user`'s relationship to `contact`. Friendship needs an
    /// accepted row in either direction; a block in either direction wins.
    pub fn set_contact(&self, user: Uuid, contact: Uuid, status: ContactStatus) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO contacts (user_id, contact_id, status) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id, contact_id) DO UPDATE SET status = excluded.status",
                params![user.to_string(), contact.to_string(), status.as_str()],
            )?;
            Ok(())
        })
    }

    pub fn upsert_profile(&self, profile: &Profile) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (user_id, display_name, avatar_url) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET
                    display_name = excluded.display_name,
                    avatar_url = excluded.avatar_url",
                params![
                    profile.user_id.to_string(),
                    profile.display_name,
                    profile.avatar_url
                ],
            )?;
            Ok(())
        })
    }
}

impl SocialGraph for Database {
    fn can_message(&self, from: Uuid, to: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let (accepted, blocked): (bool, bool) = conn.query_row(
                "SELECT
                    EXISTS(SELECT 1 FROM contacts
                           WHERE status = 'accepted'
                             AND ((user_id = ?1 AND contact_id = ?2)
                               OR (user_id = ?2 AND contact_id = ?1))),
                    EXISTS(SELECT 1 FROM contacts
                           WHERE status = 'blocked'
                             AND ((user_id = ?1 AND contact_id = ?2)
                               OR (user_id = ?2 AND contact_id = ?1)))",
                params![from.to_string(), to.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(accepted && !blocked)
        })
    }

    fn friends_of(&self, user: Uuid) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT contact_id FROM contacts WHERE user_id = ?1 AND status = 'accepted'
                 UNION
                 SELECT user_id FROM contacts WHERE contact_id = ?1 AND status = 'accepted'
                 EXCEPT
                 SELECT contact_id FROM contacts WHERE user_id = ?1 AND status = 'blocked'
                 EXCEPT
                 SELECT user_id FROM contacts WHERE contact_id = ?1 AND status = 'blocked'",
            )?;
            let friends = stmt
                .query_map([user.to_string()], |row| get_uuid(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(friends)
        })
    }
}

impl ProfileDirectory for Database {
    fn profiles(&self, users: &[Uuid]) -> Result<HashMap<Uuid, Profile>> {
        if users.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=users.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT user_id, display_name, avatar_url FROM profiles WHERE user_id IN ({})",
                placeholders.join(", ")
            );
            let ids: Vec<String> = users.iter().map(|u| u.to_string()).collect();

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), |row| {
                Ok(Profile {
                    user_id: get_uuid(row, 0)?,
                    display_name: row.get(1)?,
                    avatar_url: row.get(2)?,
                })
            })?;

            let mut out = HashMap::new();
            for profile in rows {
                let profile = profile?;
                out.insert(profile.user_id, profile);
            }
            Ok(out)
        })
    }
}
