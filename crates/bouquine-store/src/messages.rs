//! Message storage: append, paginate, edit, delete, react.
//!
//! Sending bumps the conversation's denormalized columns (message count,
//! last-message preview, first-message timestamp, recipient unread
//! counter) in the same transaction as the insert.  Reactions are
//! single-slot per user: the `(message_id, user_id)` primary key makes a
//! second emoji from the same user a replace, never an accumulate.

use std::collections::BTreeMap;

use bouquine_shared::{
    ConversationId, DeliveryStatus, MessageId, ReactionOutcome, UserId,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::changes::{ChangeKind, MessageChange, StoreEvent};
use crate::database::{decode_ts, decode_uuid, encode_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::{Message, ReplyRef};

/// Preview shown in the conversation list for an image-only message.
const IMAGE_PREVIEW: &str = "[photo]";

/// Maximum length of the last-message preview stored on the conversation.
const PREVIEW_LEN: usize = 120;

/// Everything the caller chooses about a new message.  Id, timestamp and
/// delivery status are assigned by the store.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub forwarded: bool,
    pub reply_to: Option<ReplyRef>,
}

/// Keyset pagination cursor: position of the oldest loaded message.
/// The id breaks timestamp ties so a page boundary inside a tie cannot
/// skip rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub timestamp: DateTime<Utc>,
    pub id: MessageId,
}

impl Database {
    /// Append a message.  In one transaction: insert the row with a
    /// store-assigned timestamp, bump the conversation's message count and
    /// preview, set the first-message timestamp on the very first send,
    /// and increment the recipient's unread counter.
    pub fn send_message(&mut self, draft: MessageDraft) -> Result<Message> {
        let message = {
            let tx = self.conn_mut().transaction()?;

            let sender_is_member: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM conversation_members
                     WHERE conversation_id = ?1 AND user_id = ?2",
                    params![draft.conversation_id.as_str(), draft.sender_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if sender_is_member.is_none() {
                return Err(StoreError::NotFound);
            }

            let id = MessageId::new();
            let timestamp = Utc::now();

            tx.execute(
                "INSERT INTO messages
                     (id, conversation_id, sender_id, text, image_url, timestamp,
                      edited, forwarded, reply_to_id, reply_preview, reply_sender_name, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?9, ?10, 'sent')",
                params![
                    id.to_string(),
                    draft.conversation_id.as_str(),
                    draft.sender_id.as_str(),
                    draft.text,
                    draft.image_url,
                    encode_ts(&timestamp),
                    draft.forwarded as i64,
                    draft.reply_to.as_ref().map(|r| r.message_id.to_string()),
                    draft.reply_to.as_ref().map(|r| r.preview.as_str()),
                    draft.reply_to.as_ref().map(|r| r.sender_name.as_str()),
                ],
            )?;

            let preview = preview_of(draft.text.as_deref());
            tx.execute(
                "UPDATE conversations SET
                     last_message_text = ?2,
                     last_message_at   = ?3,
                     first_message_at  = COALESCE(first_message_at, ?3),
                     message_count     = message_count + 1
                 WHERE id = ?1",
                params![
                    draft.conversation_id.as_str(),
                    preview,
                    encode_ts(&timestamp)
                ],
            )?;

            tx.execute(
                "UPDATE conversation_members SET unread_count = unread_count + 1
                 WHERE conversation_id = ?1 AND user_id != ?2",
                params![draft.conversation_id.as_str(), draft.sender_id.as_str()],
            )?;

            let message = Message {
                id,
                conversation_id: draft.conversation_id.clone(),
                sender_id: draft.sender_id.clone(),
                text: draft.text,
                image_url: draft.image_url,
                timestamp,
                edited: false,
                forwarded: draft.forwarded,
                reply_to: draft.reply_to,
                reactions: BTreeMap::new(),
                status: DeliveryStatus::Sent,
            };

            tx.commit()?;
            message
        };

        tracing::debug!(msg_id = %message.id, conversation = %message.conversation_id, "message sent");
        self.bus().publish(StoreEvent::Message(MessageChange {
            kind: ChangeKind::Added,
            message: message.clone(),
        }));
        self.bus().publish(StoreEvent::ConversationUpdated {
            id: message.conversation_id.clone(),
        });

        Ok(message)
    }

    /// Fetch one history page: up to `limit` messages strictly older than
    /// the cursor position (or the newest messages when `before` is
    /// `None`), in descending `(timestamp, id)` order.  The caller
    /// reverses for display.
    pub fn get_messages_before(
        &self,
        conversation_id: &ConversationId,
        before: Option<&PageCursor>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let mut messages = match before {
            Some(cursor) => {
                let mut stmt = self.conn().prepare(
                    "SELECT id, conversation_id, sender_id, text, image_url, timestamp,
                            edited, forwarded, reply_to_id, reply_preview, reply_sender_name, status
                     FROM messages
                     WHERE conversation_id = ?1
                       AND (timestamp < ?2 OR (timestamp = ?2 AND id < ?3))
                     ORDER BY timestamp DESC, id DESC
                     LIMIT ?4",
                )?;
                let rows = stmt.query_map(
                    params![
                        conversation_id.as_str(),
                        encode_ts(&cursor.timestamp),
                        cursor.id.to_string(),
                        limit
                    ],
                    row_to_message,
                )?;
                collect_rows(rows)?
            }
            None => {
                let mut stmt = self.conn().prepare(
                    "SELECT id, conversation_id, sender_id, text, image_url, timestamp,
                            edited, forwarded, reply_to_id, reply_preview, reply_sender_name, status
                     FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY timestamp DESC, id DESC
                     LIMIT ?2",
                )?;
                let rows =
                    stmt.query_map(params![conversation_id.as_str(), limit], row_to_message)?;
                collect_rows(rows)?
            }
        };

        for message in &mut messages {
            message.reactions = load_reactions(self.conn(), &message.id)?;
        }
        Ok(messages)
    }

    /// Fetch a single message with its reaction map.
    pub fn get_message(&self, id: &MessageId) -> Result<Message> {
        query_message(self.conn(), &id.to_string())
    }

    /// Replace the text of the sender's own message and set the edited
    /// flag.  Single-document write; editing someone else's message (or a
    /// deleted one) is NotFound.
    pub fn edit_message(
        &self,
        id: &MessageId,
        editor: &UserId,
        new_text: &str,
    ) -> Result<Message> {
        let affected = self.conn().execute(
            "UPDATE messages SET text = ?3, edited = 1
             WHERE id = ?1 AND sender_id = ?2",
            params![id.to_string(), editor.as_str(), new_text],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }

        let message = query_message(self.conn(), &id.to_string())?;
        self.bus().publish(StoreEvent::Message(MessageChange {
            kind: ChangeKind::Modified,
            message: message.clone(),
        }));
        Ok(message)
    }

    /// Hard-delete the sender's own message.  No tombstone is kept, so a
    /// reply reference to it can no longer be re-validated — accepted
    /// product limitation.
    pub fn delete_message(&self, id: &MessageId, deleter: &UserId) -> Result<Message> {
        let message = query_message(self.conn(), &id.to_string())?;
        if &message.sender_id != deleter {
            return Err(StoreError::NotFound);
        }

        self.conn().execute(
            "DELETE FROM messages WHERE id = ?1",
            params![id.to_string()],
        )?;

        self.bus().publish(StoreEvent::Message(MessageChange {
            kind: ChangeKind::Removed,
            message: message.clone(),
        }));
        Ok(message)
    }

    /// Single-slot reaction toggle.  In one transaction: no current entry
    /// inserts, the same emoji removes, a different emoji replaces.
    pub fn toggle_reaction(
        &mut self,
        message_id: &MessageId,
        user: &UserId,
        emoji: &str,
    ) -> Result<(ReactionOutcome, Message)> {
        let outcome = {
            let tx = self.conn_mut().transaction()?;

            let message_exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM messages WHERE id = ?1",
                    params![message_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            if message_exists.is_none() {
                return Err(StoreError::NotFound);
            }

            let current: Option<String> = tx
                .query_row(
                    "SELECT emoji FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                    params![message_id.to_string(), user.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            let outcome = match current.as_deref() {
                None => {
                    tx.execute(
                        "INSERT INTO reactions (message_id, user_id, emoji, created_at)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![
                            message_id.to_string(),
                            user.as_str(),
                            emoji,
                            encode_ts(&Utc::now())
                        ],
                    )?;
                    ReactionOutcome::Added
                }
                Some(held) if held == emoji => {
                    tx.execute(
                        "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2",
                        params![message_id.to_string(), user.as_str()],
                    )?;
                    ReactionOutcome::Removed
                }
                Some(_) => {
                    tx.execute(
                        "UPDATE reactions SET emoji = ?3, created_at = ?4
                         WHERE message_id = ?1 AND user_id = ?2",
                        params![
                            message_id.to_string(),
                            user.as_str(),
                            emoji,
                            encode_ts(&Utc::now())
                        ],
                    )?;
                    ReactionOutcome::Replaced
                }
            };

            tx.commit()?;
            outcome
        };

        let message = query_message(self.conn(), &message_id.to_string())?;
        self.bus().publish(StoreEvent::Message(MessageChange {
            kind: ChangeKind::Modified,
            message: message.clone(),
        }));
        Ok((outcome, message))
    }
}

// ---------------------------------------------------------------------------
// Helpers shared with conversations.rs (read inside open transactions)
// ---------------------------------------------------------------------------

/// Load one message row plus its reactions.  Works on a plain connection
/// or inside an open transaction.
pub(crate) fn query_message(conn: &Connection, id: &str) -> Result<Message> {
    let mut message = conn
        .query_row(
            "SELECT id, conversation_id, sender_id, text, image_url, timestamp,
                    edited, forwarded, reply_to_id, reply_preview, reply_sender_name, status
             FROM messages WHERE id = ?1",
            params![id],
            row_to_message,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            other => StoreError::Sqlite(other),
        })?;
    message.reactions = load_reactions(conn, &message.id)?;
    Ok(message)
}

fn load_reactions(conn: &Connection, message_id: &MessageId) -> Result<BTreeMap<UserId, String>> {
    let mut stmt =
        conn.prepare("SELECT user_id, emoji FROM reactions WHERE message_id = ?1")?;
    let rows = stmt.query_map(params![message_id.to_string()], |row| {
        Ok((UserId(row.get::<_, String>(0)?), row.get::<_, String>(1)?))
    })?;

    let mut reactions = BTreeMap::new();
    for row in rows {
        let (user, emoji) = row?;
        reactions.insert(user, emoji);
    }
    Ok(reactions)
}

fn collect_rows<I>(rows: I) -> Result<Vec<Message>>
where
    I: Iterator<Item = rusqlite::Result<Message>>,
{
    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

fn preview_of(text: Option<&str>) -> String {
    let raw = text.unwrap_or(IMAGE_PREVIEW);
    raw.chars().take(PREVIEW_LEN).collect()
}

/// Map a `rusqlite::Row` to a [`Message`] with an empty reaction map.
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let conversation_id: String = row.get(1)?;
    let sender_id: String = row.get(2)?;
    let text: Option<String> = row.get(3)?;
    let image_url: Option<String> = row.get(4)?;
    let ts_str: String = row.get(5)?;
    let edited: i64 = row.get(6)?;
    let forwarded: i64 = row.get(7)?;
    let reply_to_id: Option<String> = row.get(8)?;
    let reply_preview: Option<String> = row.get(9)?;
    let reply_sender_name: Option<String> = row.get(10)?;
    let status_str: String = row.get(11)?;

    let reply_to = match (reply_to_id, reply_preview, reply_sender_name) {
        (Some(rid), Some(preview), Some(sender_name)) => Some(ReplyRef {
            message_id: MessageId(decode_uuid(8, &rid)?),
            preview,
            sender_name,
        }),
        _ => None,
    };

    let status = DeliveryStatus::from_str(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            11,
            rusqlite::types::Type::Text,
            format!("unknown delivery status: {status_str}").into(),
        )
    })?;

    Ok(Message {
        id: MessageId(decode_uuid(0, &id_str)?),
        conversation_id: ConversationId(conversation_id),
        sender_id: UserId(sender_id),
        text,
        image_url,
        timestamp: decode_ts(5, &ts_str)?,
        edited: edited != 0,
        forwarded: forwarded != 0,
        reply_to,
        reactions: BTreeMap::new(),
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::tests::{open_test_db, sample_user};

    fn seed_conversation(db: &mut Database) -> (ConversationId, UserId, UserId) {
        db.upsert_user(&sample_user("ada")).unwrap();
        db.upsert_user(&sample_user("zoe")).unwrap();
        let ada = UserId("ada".into());
        let zoe = UserId("zoe".into());
        let (id, _) = db.get_or_create_conversation(&ada, &zoe).unwrap();
        (id, ada, zoe)
    }

    fn text_draft(conv: &ConversationId, sender: &UserId, text: &str) -> MessageDraft {
        MessageDraft {
            conversation_id: conv.clone(),
            sender_id: sender.clone(),
            text: Some(text.to_string()),
            image_url: None,
            forwarded: false,
            reply_to: None,
        }
    }

    #[test]
    fn send_updates_conversation_and_unread() {
        let (_dir, mut db) = open_test_db();
        let (conv, ada, zoe) = seed_conversation(&mut db);

        let sent = db.send_message(text_draft(&conv, &ada, "salut")).unwrap();
        assert_eq!(sent.status, DeliveryStatus::Sent);

        let conversation = db.get_conversation(&conv).unwrap();
        assert_eq!(conversation.message_count, 1);
        assert_eq!(conversation.last_message_text.as_deref(), Some("salut"));
        assert_eq!(conversation.first_message_at, Some(sent.timestamp));

        // Only the recipient's unread counter moved.
        assert_eq!(db.get_member(&conv, &zoe).unwrap().unread_count, 1);
        assert_eq!(db.get_member(&conv, &ada).unwrap().unread_count, 0);

        // First-message timestamp is set exactly once.
        db.send_message(text_draft(&conv, &zoe, "re")).unwrap();
        let conversation = db.get_conversation(&conv).unwrap();
        assert_eq!(conversation.first_message_at, Some(sent.timestamp));
        assert_eq!(conversation.message_count, 2);
    }

    #[test]
    fn send_by_non_member_is_not_found() {
        let (_dir, mut db) = open_test_db();
        let (conv, _, _) = seed_conversation(&mut db);
        db.upsert_user(&sample_user("mallory")).unwrap();

        let result = db.send_message(text_draft(&conv, &UserId("mallory".into()), "hi"));
        assert!(matches!(result, Err(StoreError::NotFound)));
        assert_eq!(db.get_conversation(&conv).unwrap().message_count, 0);
    }

    #[test]
    fn pagination_is_strictly_older_than_cursor() {
        let (_dir, mut db) = open_test_db();
        let (conv, ada, _) = seed_conversation(&mut db);

        let mut sent = Vec::new();
        for i in 0..5 {
            sent.push(db.send_message(text_draft(&conv, &ada, &format!("m{i}"))).unwrap());
        }

        let newest = db.get_messages_before(&conv, None, 2).unwrap();
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[0].id, sent[4].id);
        assert_eq!(newest[1].id, sent[3].id);

        let cursor = PageCursor {
            timestamp: newest[1].timestamp,
            id: newest[1].id,
        };
        let older = db.get_messages_before(&conv, Some(&cursor), 10).unwrap();
        assert_eq!(older.len(), 3);
        assert_eq!(older[0].id, sent[2].id);
        assert!(older.iter().all(|m| m.timestamp <= cursor.timestamp));
        assert!(!older.iter().any(|m| m.id == cursor.id));
    }

    #[test]
    fn pagination_does_not_skip_timestamp_ties() {
        let (_dir, mut db) = open_test_db();
        let (conv, ada, _) = seed_conversation(&mut db);

        // Force four rows onto one microsecond so a page boundary lands
        // inside the tie.
        let shared_ts = db
            .send_message(text_draft(&conv, &ada, "t0"))
            .unwrap()
            .timestamp;
        for i in 1..4 {
            db.conn()
                .execute(
                    "INSERT INTO messages (id, conversation_id, sender_id, text, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        uuid::Uuid::from_u128(i).to_string(),
                        conv.as_str(),
                        ada.as_str(),
                        format!("t{i}"),
                        encode_ts(&shared_ts),
                    ],
                )
                .unwrap();
        }

        // Page size 2 splits the tie; every row must still be reached.
        let mut collected = Vec::new();
        let mut cursor: Option<PageCursor> = None;
        loop {
            let page = db.get_messages_before(&conv, cursor.as_ref(), 2).unwrap();
            let Some(oldest) = page.last() else { break };
            cursor = Some(PageCursor {
                timestamp: oldest.timestamp,
                id: oldest.id,
            });
            collected.extend(page);
        }

        assert_eq!(collected.len(), 4);
        let mut texts: Vec<_> = collected
            .iter()
            .map(|m| m.text.clone().unwrap())
            .collect();
        texts.sort();
        assert_eq!(texts, ["t0", "t1", "t2", "t3"]);
    }

    #[test]
    fn reaction_single_slot_replace_then_remove() {
        let (_dir, mut db) = open_test_db();
        let (conv, ada, zoe) = seed_conversation(&mut db);
        let msg = db.send_message(text_draft(&conv, &ada, "salut")).unwrap();

        let (o1, _) = db.toggle_reaction(&msg.id, &zoe, "👍").unwrap();
        assert_eq!(o1, ReactionOutcome::Added);

        let (o2, m2) = db.toggle_reaction(&msg.id, &zoe, "❤️").unwrap();
        assert_eq!(o2, ReactionOutcome::Replaced);
        assert_eq!(m2.reactions.get(&zoe).map(String::as_str), Some("❤️"));
        assert_eq!(m2.reactions.len(), 1);

        // Reacting with the currently-held emoji removes the entry.
        let (o3, m3) = db.toggle_reaction(&msg.id, &zoe, "❤️").unwrap();
        assert_eq!(o3, ReactionOutcome::Removed);
        assert!(m3.reactions.is_empty());
    }

    #[test]
    fn reaction_alternating_sequence_ends_replaced() {
        let (_dir, mut db) = open_test_db();
        let (conv, ada, zoe) = seed_conversation(&mut db);
        let msg = db.send_message(text_draft(&conv, &ada, "salut")).unwrap();

        // Only the currently-held emoji removes; 👍 after ❤️ replaces.
        let (o1, _) = db.toggle_reaction(&msg.id, &zoe, "👍").unwrap();
        let (o2, _) = db.toggle_reaction(&msg.id, &zoe, "❤️").unwrap();
        let (o3, m3) = db.toggle_reaction(&msg.id, &zoe, "👍").unwrap();
        assert_eq!(o1, ReactionOutcome::Added);
        assert_eq!(o2, ReactionOutcome::Replaced);
        assert_eq!(o3, ReactionOutcome::Replaced);
        assert_eq!(m3.reactions.get(&zoe).map(String::as_str), Some("👍"));
    }

    #[test]
    fn edit_and_delete_enforce_ownership() {
        let (_dir, mut db) = open_test_db();
        let (conv, ada, zoe) = seed_conversation(&mut db);
        let msg = db.send_message(text_draft(&conv, &ada, "salut")).unwrap();

        assert!(matches!(
            db.edit_message(&msg.id, &zoe, "hacked"),
            Err(StoreError::NotFound)
        ));

        let edited = db.edit_message(&msg.id, &ada, "salut !").unwrap();
        assert!(edited.edited);
        assert_eq!(edited.text.as_deref(), Some("salut !"));

        assert!(matches!(
            db.delete_message(&msg.id, &zoe),
            Err(StoreError::NotFound)
        ));
        db.delete_message(&msg.id, &ada).unwrap();
        assert!(matches!(db.get_message(&msg.id), Err(StoreError::NotFound)));
    }

    #[test]
    fn mark_read_flips_only_peer_sent_messages() {
        let (_dir, mut db) = open_test_db();
        let (conv, ada, zoe) = seed_conversation(&mut db);

        let from_ada = db.send_message(text_draft(&conv, &ada, "salut")).unwrap();
        let from_zoe = db.send_message(text_draft(&conv, &zoe, "re")).unwrap();

        let changes = db.mark_conversation_read(&conv, &zoe).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].message.id, from_ada.id);
        assert_eq!(changes[0].message.status, DeliveryStatus::Read);

        // Zoe's own message is untouched, her unread counter is zeroed.
        assert_eq!(
            db.get_message(&from_zoe.id).unwrap().status,
            DeliveryStatus::Sent
        );
        assert_eq!(db.get_member(&conv, &zoe).unwrap().unread_count, 0);

        // Second mark-read is a no-op.
        assert!(db.mark_conversation_read(&conv, &zoe).unwrap().is_empty());
    }
}
