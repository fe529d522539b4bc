//! Social graph: follow edges and their counter ledger.
//!
//! An edge exists exactly once in the `follows` table; the denormalized
//! `following_count` / `followers_count` columns on the two user rows move
//! in the same transaction as the edge, so at every settled point each
//! counter equals the cardinality of the set it mirrors.

use bouquine_shared::{ToggleOutcome, UserId};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::changes::StoreEvent;
use crate::database::{decode_ts, encode_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::FollowEdge;

impl Database {
    /// Toggle the follow edge follower → followee.  One transaction:
    /// read current membership, then either insert the edge and increment
    /// both counters, or delete it and decrement both.  Exactly one of
    /// Added/Removed is reported.
    pub fn toggle_follow(
        &mut self,
        follower: &UserId,
        followee: &UserId,
    ) -> Result<ToggleOutcome> {
        let outcome = {
            let tx = self.conn_mut().transaction()?;

            ensure_user(&tx, follower)?;
            ensure_user(&tx, followee)?;

            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
                    params![follower.as_str(), followee.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            let outcome = if exists.is_some() {
                tx.execute(
                    "DELETE FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
                    params![follower.as_str(), followee.as_str()],
                )?;
                tx.execute(
                    "UPDATE users SET following_count = following_count - 1 WHERE id = ?1",
                    params![follower.as_str()],
                )?;
                tx.execute(
                    "UPDATE users SET followers_count = followers_count - 1 WHERE id = ?1",
                    params![followee.as_str()],
                )?;
                ToggleOutcome::Removed
            } else {
                tx.execute(
                    "INSERT INTO follows (follower_id, followee_id, created_at)
                     VALUES (?1, ?2, ?3)",
                    params![follower.as_str(), followee.as_str(), encode_ts(&Utc::now())],
                )?;
                tx.execute(
                    "UPDATE users SET following_count = following_count + 1 WHERE id = ?1",
                    params![follower.as_str()],
                )?;
                tx.execute(
                    "UPDATE users SET followers_count = followers_count + 1 WHERE id = ?1",
                    params![followee.as_str()],
                )?;
                ToggleOutcome::Added
            };

            tx.commit()?;
            outcome
        };

        tracing::debug!(%follower, %followee, ?outcome, "follow toggled");
        self.bus().publish(StoreEvent::FollowToggled {
            follower: follower.clone(),
            followee: followee.clone(),
            outcome,
        });

        Ok(outcome)
    }

    /// Whether the edge follower → followee currently exists.
    pub fn is_following(&self, follower: &UserId, followee: &UserId) -> Result<bool> {
        let exists: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM follows WHERE follower_id = ?1 AND followee_id = ?2",
                params![follower.as_str(), followee.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    /// Users this user follows, most recent edge first.
    pub fn list_following(&self, follower: &UserId) -> Result<Vec<FollowEdge>> {
        self.list_edges(
            "SELECT follower_id, followee_id, created_at FROM follows
             WHERE follower_id = ?1 ORDER BY created_at DESC",
            follower,
        )
    }

    /// Users following this user, most recent edge first.
    pub fn list_followers(&self, followee: &UserId) -> Result<Vec<FollowEdge>> {
        self.list_edges(
            "SELECT follower_id, followee_id, created_at FROM follows
             WHERE followee_id = ?1 ORDER BY created_at DESC",
            followee,
        )
    }

    fn list_edges(&self, sql: &str, key: &UserId) -> Result<Vec<FollowEdge>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params![key.as_str()], |row| {
            let created_str: String = row.get(2)?;
            Ok(FollowEdge {
                follower_id: UserId(row.get::<_, String>(0)?),
                followee_id: UserId(row.get::<_, String>(1)?),
                created_at: decode_ts(2, &created_str)?,
            })
        })?;

        let mut edges = Vec::new();
        for row in rows {
            edges.push(row?);
        }
        Ok(edges)
    }
}

fn ensure_user(conn: &Connection, user: &UserId) -> Result<()> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM users WHERE id = ?1",
            params![user.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::tests::{open_test_db, sample_user};

    fn seed(db: &Database, ids: &[&str]) -> Vec<UserId> {
        ids.iter()
            .map(|id| {
                db.upsert_user(&sample_user(id)).unwrap();
                UserId(id.to_string())
            })
            .collect()
    }

    /// Counter == |materialized set| after any settled toggle sequence.
    fn assert_ledger_consistent(db: &Database, user: &UserId) {
        let loaded = db.get_user(user).unwrap();
        assert_eq!(
            loaded.following_count,
            db.list_following(user).unwrap().len() as i64
        );
        assert_eq!(
            loaded.followers_count,
            db.list_followers(user).unwrap().len() as i64
        );
    }

    #[test]
    fn toggle_parity_and_counters() {
        let (_dir, mut db) = open_test_db();
        let ids = seed(&db, &["ada", "zoe"]);
        let (ada, zoe) = (&ids[0], &ids[1]);

        // Odd number of toggles: edge ends up present.
        assert_eq!(db.toggle_follow(ada, zoe).unwrap(), ToggleOutcome::Added);
        assert_eq!(db.toggle_follow(ada, zoe).unwrap(), ToggleOutcome::Removed);
        assert_eq!(db.toggle_follow(ada, zoe).unwrap(), ToggleOutcome::Added);

        assert!(db.is_following(ada, zoe).unwrap());
        assert!(!db.is_following(zoe, ada).unwrap());
        assert_eq!(db.get_user(ada).unwrap().following_count, 1);
        assert_eq!(db.get_user(zoe).unwrap().followers_count, 1);
        assert_ledger_consistent(&db, ada);
        assert_ledger_consistent(&db, zoe);
    }

    #[test]
    fn counters_track_multiple_edges() {
        let (_dir, mut db) = open_test_db();
        let ids = seed(&db, &["ada", "zoe", "eva"]);
        let (ada, zoe, eva) = (&ids[0], &ids[1], &ids[2]);

        db.toggle_follow(ada, zoe).unwrap();
        db.toggle_follow(ada, eva).unwrap();
        db.toggle_follow(zoe, eva).unwrap();
        db.toggle_follow(ada, zoe).unwrap(); // unfollow

        assert_eq!(db.get_user(ada).unwrap().following_count, 1);
        assert_eq!(db.get_user(eva).unwrap().followers_count, 2);
        assert_eq!(db.get_user(zoe).unwrap().followers_count, 0);
        for user in [ada, zoe, eva] {
            assert_ledger_consistent(&db, user);
        }
    }

    #[test]
    fn toggle_against_unknown_user_leaves_no_trace() {
        let (_dir, mut db) = open_test_db();
        let ids = seed(&db, &["ada"]);
        let ada = &ids[0];
        let ghost = UserId("ghost".into());

        assert!(matches!(
            db.toggle_follow(ada, &ghost),
            Err(StoreError::NotFound)
        ));
        assert_eq!(db.get_user(ada).unwrap().following_count, 0);
        assert!(db.list_following(ada).unwrap().is_empty());
    }
}
