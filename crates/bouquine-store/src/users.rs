//! CRUD operations for [`User`] records.
//!
//! The three counter columns (`following_count`, `followers_count`,
//! `books_read_count`) are never written here: they only move inside the
//! ledger transactions in `social.rs` and `readings.rs`, in lockstep with
//! the sets they denormalize.

use bouquine_shared::UserId;
use chrono::Utc;
use rusqlite::params;

use crate::database::{decode_ts, encode_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::User;

impl Database {
    /// Insert a profile, or refresh its mutable fields if it already
    /// exists.  Counters are deliberately left out of the conflict clause.
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, display_name, avatar_url, bio, online, last_seen_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 avatar_url   = excluded.avatar_url,
                 bio          = excluded.bio",
            params![
                user.id.as_str(),
                user.display_name,
                user.avatar_url,
                user.bio,
                user.online as i64,
                encode_ts(&user.last_seen_at),
                encode_ts(&user.created_at),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single user by id.
    pub fn get_user(&self, id: &UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, display_name, avatar_url, bio, following_count, followers_count,
                        books_read_count, online, last_seen_at, created_at
                 FROM users WHERE id = ?1",
                params![id.as_str()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Fetch several users at once.  Ids with no matching row are silently
    /// skipped; callers that need strictness compare lengths.
    pub fn get_users(&self, ids: &[UserId]) -> Result<Vec<User>> {
        let mut users = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_user(id) {
                Ok(user) => users.push(user),
                Err(StoreError::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(users)
    }

    /// Flip the online flag; going offline also touches `last_seen_at`.
    pub fn set_online(&self, id: &UserId, online: bool) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET online = ?2, last_seen_at = ?3 WHERE id = ?1",
            params![id.as_str(), online as i64, encode_ts(&Utc::now())],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Update a user's bio.
    pub fn set_user_bio(&self, id: &UserId, bio: Option<&str>) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET bio = ?2 WHERE id = ?1",
            params![id.as_str(), bio],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

/// Map a `rusqlite::Row` to a [`User`].
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let display_name: String = row.get(1)?;
    let avatar_url: Option<String> = row.get(2)?;
    let bio: Option<String> = row.get(3)?;
    let following_count: i64 = row.get(4)?;
    let followers_count: i64 = row.get(5)?;
    let books_read_count: i64 = row.get(6)?;
    let online: i64 = row.get(7)?;
    let last_seen_str: String = row.get(8)?;
    let created_str: String = row.get(9)?;

    Ok(User {
        id: UserId(id),
        display_name,
        avatar_url,
        bio,
        following_count,
        followers_count,
        books_read_count,
        online: online != 0,
        last_seen_at: decode_ts(8, &last_seen_str)?,
        created_at: decode_ts(9, &created_str)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::database::Database;

    pub(crate) fn open_test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    pub(crate) fn sample_user(id: &str) -> User {
        let now = Utc::now();
        User {
            id: UserId(id.to_string()),
            display_name: id.to_uppercase(),
            avatar_url: None,
            bio: None,
            following_count: 0,
            followers_count: 0,
            books_read_count: 0,
            online: false,
            last_seen_at: now,
            created_at: now,
        }
    }

    #[test]
    fn upsert_preserves_counters() {
        let (_dir, db) = open_test_db();
        let user = sample_user("ada");
        db.upsert_user(&user).unwrap();

        // Bump a counter out-of-band, then upsert the profile again.
        db.conn()
            .execute("UPDATE users SET followers_count = 3 WHERE id = 'ada'", [])
            .unwrap();
        let mut renamed = user.clone();
        renamed.display_name = "Ada L.".to_string();
        db.upsert_user(&renamed).unwrap();

        let loaded = db.get_user(&UserId("ada".into())).unwrap();
        assert_eq!(loaded.display_name, "Ada L.");
        assert_eq!(loaded.followers_count, 3);
    }

    #[test]
    fn missing_user_is_not_found() {
        let (_dir, db) = open_test_db();
        assert!(matches!(
            db.get_user(&UserId("ghost".into())),
            Err(StoreError::NotFound)
        ));
    }
}
