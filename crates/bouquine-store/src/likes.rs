//! Likes on readings and comments, plus the comment like-counter ledger.
//!
//! A Like row's existence is the sole source of truth for "liked by this
//! user"; `comments.likes_count` is denormalized from it and only ever
//! moves inside the same transaction as the Like insert/delete.

use bouquine_shared::{BookId, CommentId, LikeSubject, ToggleOutcome, UserId};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::changes::StoreEvent;
use crate::database::{decode_ts, decode_uuid, encode_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::Comment;

impl Database {
    // ------------------------------------------------------------------
    // Comments
    // ------------------------------------------------------------------

    /// Insert a new comment on a book.
    pub fn create_comment(&self, comment: &Comment) -> Result<()> {
        self.conn().execute(
            "INSERT INTO comments (id, book_id, author_id, text, likes_count, last_like_at, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, NULL, ?5)",
            params![
                comment.id.to_string(),
                comment.book_id.as_str(),
                comment.author_id.as_str(),
                comment.text,
                encode_ts(&comment.created_at),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single comment by id.
    pub fn get_comment(&self, id: &CommentId) -> Result<Comment> {
        self.conn()
            .query_row(
                "SELECT id, book_id, author_id, text, likes_count, last_like_at, created_at
                 FROM comments WHERE id = ?1",
                params![id.to_string()],
                row_to_comment,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// All comments on a book, newest first.
    pub fn list_comments_for_book(&self, book: &BookId) -> Result<Vec<Comment>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, book_id, author_id, text, likes_count, last_like_at, created_at
             FROM comments WHERE book_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![book.as_str()], row_to_comment)?;

        let mut comments = Vec::new();
        for row in rows {
            comments.push(row?);
        }
        Ok(comments)
    }

    // ------------------------------------------------------------------
    // Reading likes (toggle-set only, no counter)
    // ------------------------------------------------------------------

    /// Toggle a like on another user's reading of a book.  The reading
    /// must exist, active or completed; otherwise the transaction aborts
    /// with NotFound and nothing is written.
    pub fn toggle_reading_like(
        &mut self,
        target_user: &UserId,
        book: &BookId,
        liker: &UserId,
    ) -> Result<ToggleOutcome> {
        let outcome = {
            let tx = self.conn_mut().transaction()?;

            let reading_exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM readings WHERE user_id = ?1 AND book_id = ?2
                     UNION ALL
                     SELECT 1 FROM completed_readings WHERE user_id = ?1 AND book_id = ?2
                     LIMIT 1",
                    params![target_user.as_str(), book.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if reading_exists.is_none() {
                return Err(StoreError::NotFound);
            }

            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM likes
                     WHERE subject = 'reading' AND target_user_id = ?1 AND book_id = ?2
                       AND comment_id = '' AND liker_id = ?3",
                    params![target_user.as_str(), book.as_str(), liker.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            let outcome = if exists.is_some() {
                tx.execute(
                    "DELETE FROM likes
                     WHERE subject = 'reading' AND target_user_id = ?1 AND book_id = ?2
                       AND comment_id = '' AND liker_id = ?3",
                    params![target_user.as_str(), book.as_str(), liker.as_str()],
                )?;
                ToggleOutcome::Removed
            } else {
                tx.execute(
                    "INSERT INTO likes (subject, target_user_id, book_id, comment_id, liker_id, created_at)
                     VALUES ('reading', ?1, ?2, '', ?3, ?4)",
                    params![
                        target_user.as_str(),
                        book.as_str(),
                        liker.as_str(),
                        encode_ts(&Utc::now())
                    ],
                )?;
                ToggleOutcome::Added
            };

            tx.commit()?;
            outcome
        };

        self.bus().publish(StoreEvent::LikeToggled {
            subject: LikeSubject::Reading,
            target_user: target_user.clone(),
            book: book.clone(),
            comment: None,
            liker: liker.clone(),
            outcome,
        });
        Ok(outcome)
    }

    /// Whether `liker` currently likes the reading.
    pub fn is_reading_liked(
        &self,
        target_user: &UserId,
        book: &BookId,
        liker: &UserId,
    ) -> Result<bool> {
        let exists: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM likes
                 WHERE subject = 'reading' AND target_user_id = ?1 AND book_id = ?2
                   AND comment_id = '' AND liker_id = ?3",
                params![target_user.as_str(), book.as_str(), liker.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    /// Number of likes on a reading.
    pub fn count_reading_likes(&self, target_user: &UserId, book: &BookId) -> Result<i64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM likes
             WHERE subject = 'reading' AND target_user_id = ?1 AND book_id = ?2
               AND comment_id = ''",
            params![target_user.as_str(), book.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Comment likes (toggle-set + likes_count ledger)
    // ------------------------------------------------------------------

    /// Toggle a like on a comment.  In the same transaction the comment's
    /// `likes_count` moves by ±1 and `last_like_at` is touched on add.
    pub fn toggle_comment_like(
        &mut self,
        comment_id: &CommentId,
        liker: &UserId,
    ) -> Result<ToggleOutcome> {
        let (outcome, book, author) = {
            let tx = self.conn_mut().transaction()?;

            let target: Option<(String, String)> = tx
                .query_row(
                    "SELECT book_id, author_id FROM comments WHERE id = ?1",
                    params![comment_id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let (book, author) = target.ok_or(StoreError::NotFound)?;

            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM likes
                     WHERE subject = 'comment' AND comment_id = ?1 AND liker_id = ?2",
                    params![comment_id.to_string(), liker.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            let outcome = if exists.is_some() {
                tx.execute(
                    "DELETE FROM likes
                     WHERE subject = 'comment' AND comment_id = ?1 AND liker_id = ?2",
                    params![comment_id.to_string(), liker.as_str()],
                )?;
                tx.execute(
                    "UPDATE comments SET likes_count = likes_count - 1 WHERE id = ?1",
                    params![comment_id.to_string()],
                )?;
                ToggleOutcome::Removed
            } else {
                tx.execute(
                    "INSERT INTO likes (subject, target_user_id, book_id, comment_id, liker_id, created_at)
                     VALUES ('comment', ?1, ?2, ?3, ?4, ?5)",
                    params![
                        author,
                        book,
                        comment_id.to_string(),
                        liker.as_str(),
                        encode_ts(&Utc::now())
                    ],
                )?;
                tx.execute(
                    "UPDATE comments SET likes_count = likes_count + 1, last_like_at = ?2
                     WHERE id = ?1",
                    params![comment_id.to_string(), encode_ts(&Utc::now())],
                )?;
                ToggleOutcome::Added
            };

            tx.commit()?;
            (outcome, book, author)
        };

        self.bus().publish(StoreEvent::LikeToggled {
            subject: LikeSubject::Comment,
            target_user: UserId(author),
            book: BookId(book),
            comment: Some(*comment_id),
            liker: liker.clone(),
            outcome,
        });
        Ok(outcome)
    }

    /// Whether `liker` currently likes the comment.
    pub fn is_comment_liked(&self, comment_id: &CommentId, liker: &UserId) -> Result<bool> {
        let exists: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM likes
                 WHERE subject = 'comment' AND comment_id = ?1 AND liker_id = ?2",
                params![comment_id.to_string(), liker.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    /// Number of Like rows targeting a comment (for invariant checks; the
    /// denormalized `likes_count` is what the UI reads).
    pub fn count_comment_likes(&self, comment_id: &CommentId) -> Result<i64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM likes WHERE subject = 'comment' AND comment_id = ?1",
            params![comment_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

/// Map a `rusqlite::Row` to a [`Comment`].
fn row_to_comment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Comment> {
    let id_str: String = row.get(0)?;
    let book_id: String = row.get(1)?;
    let author_id: String = row.get(2)?;
    let text: String = row.get(3)?;
    let likes_count: i64 = row.get(4)?;
    let last_like_str: Option<String> = row.get(5)?;
    let created_str: String = row.get(6)?;

    Ok(Comment {
        id: CommentId(decode_uuid(0, &id_str)?),
        book_id: BookId(book_id),
        author_id: UserId(author_id),
        text,
        likes_count,
        last_like_at: last_like_str
            .as_deref()
            .map(|s| decode_ts(5, s))
            .transpose()?,
        created_at: decode_ts(6, &created_str)?,
    })
}
