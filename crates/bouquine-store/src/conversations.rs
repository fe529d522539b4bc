//! Conversation records and per-participant state.
//!
//! A conversation between two users exists at most once: its id is the
//! sorted participant pair, and [`Database::get_or_create_conversation`]
//! re-checks existence inside its transaction so that two users opening
//! the same conversation concurrently converge on a single row with at
//! most one creation.

use bouquine_shared::{ConversationId, UserId};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::changes::{ChangeKind, MessageChange, StoreEvent};
use crate::database::{decode_ts, encode_ts, Database};
use crate::error::{Result, StoreError};
use crate::messages::query_message;
use crate::models::{Conversation, ConversationMember};

/// Per-participant boolean flags settable from the conversation list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberFlag {
    Favorite,
    Pinned,
    Archived,
}

impl MemberFlag {
    fn column(&self) -> &'static str {
        match self {
            Self::Favorite => "favorite",
            Self::Pinned => "pinned",
            Self::Archived => "archived",
        }
    }
}

impl Database {
    /// Return the conversation id for the pair, creating the record if it
    /// does not exist yet.
    ///
    /// The existence check and the insert happen in one transaction, which
    /// closes the race between two concurrent initiators.  Participant
    /// display names and avatars are snapshotted from the user rows on the
    /// create branch only; they are not kept in sync with later profile
    /// edits.  Returns the id plus whether this call performed the create.
    pub fn get_or_create_conversation(
        &mut self,
        a: &UserId,
        b: &UserId,
    ) -> Result<(ConversationId, bool)> {
        let id = ConversationId::for_pair(a, b);

        let created = {
            let tx = self.conn_mut().transaction()?;

            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM conversations WHERE id = ?1",
                    params![id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            if exists.is_some() {
                false
            } else {
                // Snapshot both profiles; a missing participant aborts the
                // whole transaction.
                let snapshot_a = member_snapshot(&tx, a)?;
                let snapshot_b = member_snapshot(&tx, b)?;

                let now = encode_ts(&Utc::now());
                tx.execute(
                    "INSERT INTO conversations (id, created_at) VALUES (?1, ?2)",
                    params![id.as_str(), now],
                )?;
                for (user, (name, avatar)) in [(a, snapshot_a), (b, snapshot_b)] {
                    tx.execute(
                        "INSERT INTO conversation_members
                             (conversation_id, user_id, display_name, avatar_url)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![id.as_str(), user.as_str(), name, avatar],
                    )?;
                }

                tx.commit()?;
                true
            }
        };

        if created {
            tracing::debug!(conversation = %id, "conversation created");
            self.bus()
                .publish(StoreEvent::ConversationUpdated { id: id.clone() });
        }

        Ok((id, created))
    }

    /// Fetch a single conversation by id.
    pub fn get_conversation(&self, id: &ConversationId) -> Result<Conversation> {
        self.conn()
            .query_row(
                "SELECT id, created_at, last_message_text, last_message_at,
                        first_message_at, message_count, affinity_score
                 FROM conversations WHERE id = ?1",
                params![id.as_str()],
                row_to_conversation,
            )
            .map_err(not_found)
    }

    /// Fetch one participant's state row.
    pub fn get_member(&self, id: &ConversationId, user: &UserId) -> Result<ConversationMember> {
        self.conn()
            .query_row(
                "SELECT conversation_id, user_id, display_name, avatar_url, unread_count,
                        typing, active, favorite, pinned, archived
                 FROM conversation_members
                 WHERE conversation_id = ?1 AND user_id = ?2",
                params![id.as_str(), user.as_str()],
                row_to_member,
            )
            .map_err(not_found)
    }

    /// Both participants' state rows, ascending by user id.
    pub fn get_members(&self, id: &ConversationId) -> Result<Vec<ConversationMember>> {
        let mut stmt = self.conn().prepare(
            "SELECT conversation_id, user_id, display_name, avatar_url, unread_count,
                    typing, active, favorite, pinned, archived
             FROM conversation_members
             WHERE conversation_id = ?1
             ORDER BY user_id ASC",
        )?;
        let rows = stmt.query_map(params![id.as_str()], row_to_member)?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    /// All conversations a user participates in, most recently active
    /// first, paired with the caller's own member row (unread counter,
    /// flags).
    pub fn list_conversations_for_user(
        &self,
        user: &UserId,
    ) -> Result<Vec<(Conversation, ConversationMember)>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id, c.created_at, c.last_message_text, c.last_message_at,
                    c.first_message_at, c.message_count, c.affinity_score,
                    m.conversation_id, m.user_id, m.display_name, m.avatar_url,
                    m.unread_count, m.typing, m.active, m.favorite, m.pinned, m.archived
             FROM conversations c
             JOIN conversation_members m ON m.conversation_id = c.id
             WHERE m.user_id = ?1
             ORDER BY c.last_message_at IS NULL, c.last_message_at DESC",
        )?;
        let rows = stmt.query_map(params![user.as_str()], |row| {
            let conversation = row_to_conversation(row)?;
            let member = ConversationMember {
                conversation_id: ConversationId(row.get::<_, String>(7)?),
                user_id: UserId(row.get::<_, String>(8)?),
                display_name: row.get(9)?,
                avatar_url: row.get(10)?,
                unread_count: row.get(11)?,
                typing: row.get::<_, i64>(12)? != 0,
                active: row.get::<_, i64>(13)? != 0,
                favorite: row.get::<_, i64>(14)? != 0,
                pinned: row.get::<_, i64>(15)? != 0,
                archived: row.get::<_, i64>(16)? != 0,
            };
            Ok((conversation, member))
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Write a participant's typing flag.  Returns `false` when the flag
    /// already held the requested value, in which case nothing is
    /// published — the write-amplification guard the typing publisher
    /// relies on.
    pub fn set_typing(&self, id: &ConversationId, user: &UserId, typing: bool) -> Result<bool> {
        self.set_member_bool(id, user, "typing", typing)
    }

    /// Add or remove a participant from the conversation's active set
    /// (insert-if-absent / remove-if-present, not a toggle).  Returns
    /// `false` on a no-op.
    pub fn set_active(&self, id: &ConversationId, user: &UserId, active: bool) -> Result<bool> {
        self.set_member_bool(id, user, "active", active)
    }

    /// Set a favorite/pinned/archived flag on the caller's member row.
    pub fn set_member_flag(
        &self,
        id: &ConversationId,
        user: &UserId,
        flag: MemberFlag,
        value: bool,
    ) -> Result<bool> {
        self.set_member_bool(id, user, flag.column(), value)
    }

    fn set_member_bool(
        &self,
        id: &ConversationId,
        user: &UserId,
        column: &'static str,
        value: bool,
    ) -> Result<bool> {
        // Trusted column name (compile-time constant), value still bound.
        let sql = format!(
            "UPDATE conversation_members SET {column} = ?3
             WHERE conversation_id = ?1 AND user_id = ?2 AND {column} != ?3"
        );
        let affected = self
            .conn()
            .execute(&sql, params![id.as_str(), user.as_str(), value as i64])?;

        if affected == 0 {
            // No-op or missing row: distinguish the two.
            self.get_member(id, user)?;
            return Ok(false);
        }

        self.bus()
            .publish(StoreEvent::ConversationUpdated { id: id.clone() });
        Ok(true)
    }

    /// Mark the conversation read from the reader's perspective: zero the
    /// reader's unread counter and flip every Sent message from the peer
    /// to Read, all in one transaction.  Returns the ids of the flipped
    /// messages.
    pub fn mark_conversation_read(
        &mut self,
        id: &ConversationId,
        reader: &UserId,
    ) -> Result<Vec<MessageChange>> {
        let changes = {
            let tx = self.conn_mut().transaction()?;

            let member_exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM conversation_members
                     WHERE conversation_id = ?1 AND user_id = ?2",
                    params![id.as_str(), reader.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if member_exists.is_none() {
                return Err(StoreError::NotFound);
            }

            tx.execute(
                "UPDATE conversation_members SET unread_count = 0
                 WHERE conversation_id = ?1 AND user_id = ?2",
                params![id.as_str(), reader.as_str()],
            )?;

            let flipped: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM messages
                     WHERE conversation_id = ?1 AND sender_id != ?2 AND status = 'sent'",
                )?;
                let rows = stmt.query_map(params![id.as_str(), reader.as_str()], |row| {
                    row.get::<_, String>(0)
                })?;
                let mut ids = Vec::new();
                for row in rows {
                    ids.push(row?);
                }
                ids
            };

            tx.execute(
                "UPDATE messages SET status = 'read'
                 WHERE conversation_id = ?1 AND sender_id != ?2 AND status = 'sent'",
                params![id.as_str(), reader.as_str()],
            )?;

            let mut changes = Vec::with_capacity(flipped.len());
            for message_id in &flipped {
                let message = query_message(&tx, message_id)?;
                changes.push(MessageChange {
                    kind: ChangeKind::Modified,
                    message,
                });
            }

            tx.commit()?;
            changes
        };

        for change in &changes {
            self.bus().publish(StoreEvent::Message(change.clone()));
        }
        self.bus()
            .publish(StoreEvent::ConversationUpdated { id: id.clone() });

        Ok(changes)
    }

    /// Hard-delete a conversation and everything under it (messages,
    /// reactions, challenge completions follow via cascade).  Bulk UI
    /// deletion only; nothing in the engine calls this on its own.
    pub fn delete_conversation(&self, id: &ConversationId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM conversations WHERE id = ?1",
            params![id.as_str()],
        )?;
        if affected > 0 {
            self.bus()
                .publish(StoreEvent::ConversationUpdated { id: id.clone() });
        }
        Ok(affected > 0)
    }
}

fn member_snapshot(conn: &Connection, user: &UserId) -> Result<(String, Option<String>)> {
    conn.query_row(
        "SELECT display_name, avatar_url FROM users WHERE id = ?1",
        params![user.as_str()],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
    )
    .map_err(not_found)
}

fn not_found(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}

/// Map a `rusqlite::Row` to a [`Conversation`] (columns 0..=6).
fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id: String = row.get(0)?;
    let created_str: String = row.get(1)?;
    let last_text: Option<String> = row.get(2)?;
    let last_at: Option<String> = row.get(3)?;
    let first_at: Option<String> = row.get(4)?;
    let message_count: i64 = row.get(5)?;
    let affinity_score: i64 = row.get(6)?;

    Ok(Conversation {
        id: ConversationId(id),
        created_at: decode_ts(1, &created_str)?,
        last_message_text: last_text,
        last_message_at: last_at.as_deref().map(|s| decode_ts(3, s)).transpose()?,
        first_message_at: first_at.as_deref().map(|s| decode_ts(4, s)).transpose()?,
        message_count,
        affinity_score,
    })
}

/// Map a `rusqlite::Row` to a [`ConversationMember`] (columns 0..=9).
fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationMember> {
    Ok(ConversationMember {
        conversation_id: ConversationId(row.get::<_, String>(0)?),
        user_id: UserId(row.get::<_, String>(1)?),
        display_name: row.get(2)?,
        avatar_url: row.get(3)?,
        unread_count: row.get(4)?,
        typing: row.get::<_, i64>(5)? != 0,
        active: row.get::<_, i64>(6)? != 0,
        favorite: row.get::<_, i64>(7)? != 0,
        pinned: row.get::<_, i64>(8)? != 0,
        archived: row.get::<_, i64>(9)? != 0,
    })
}
