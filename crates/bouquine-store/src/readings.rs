//! Library entries, reading completion and the books-read ledger.
//!
//! Exactly one of {active reading, completed reading} exists per
//! (user, book).  Every transition into or out of the finished state —
//! whether through [`Database::complete_reading`] or the generic
//! [`Database::set_library_status`] — compares old and new status inside
//! one transaction and moves `books_read_count` exactly once, so the
//! counter always equals the number of completed-reading rows.

use bouquine_shared::{BookId, LibraryStatus, ReadingStatus, UserId};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::changes::StoreEvent;
use crate::database::{decode_ts, encode_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::{CompletedReading, Reading, ReadingProgress};

impl Database {
    /// Create or update an active library entry without touching the
    /// finished state.  Starting a book that is already finished is a
    /// NotFound-free no-op on the completed row — use
    /// [`Database::set_library_status`] to move out of finished.
    pub fn upsert_reading(
        &self,
        user: &UserId,
        book: &BookId,
        status: ReadingStatus,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO readings (user_id, book_id, status, started_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, book_id) DO UPDATE SET status = excluded.status",
            params![
                user.as_str(),
                book.as_str(),
                status.as_str(),
                encode_ts(&Utc::now())
            ],
        )?;
        Ok(())
    }

    /// Mark an active reading finished: delete the active entry, create
    /// the completed record and increment `books_read_count`, atomically.
    pub fn complete_reading(&mut self, user: &UserId, book: &BookId) -> Result<()> {
        self.set_library_status(user, book, LibraryStatus::Finished)
    }

    /// Move a finished book back to an active status: delete the completed
    /// record, recreate the active entry and decrement `books_read_count`,
    /// atomically.
    pub fn uncomplete_reading(
        &mut self,
        user: &UserId,
        book: &BookId,
        back_to: ReadingStatus,
    ) -> Result<()> {
        self.set_library_status(user, book, LibraryStatus::Active(back_to))
    }

    /// Generic status-changing write.  The old status is read inside the
    /// transaction and the books-read delta is applied only when the
    /// transition actually crosses the finished boundary:
    ///
    /// - active → finished: delete active, insert completed, +1
    /// - finished → active: delete completed, insert active, -1
    /// - active → active: plain status update, counter untouched
    /// - finished → finished: no-op
    /// - nothing → active: insert
    /// - nothing → finished: NotFound (completion requires an active entry)
    pub fn set_library_status(
        &mut self,
        user: &UserId,
        book: &BookId,
        new_status: LibraryStatus,
    ) -> Result<()> {
        let completion_change: Option<bool> = {
            let tx = self.conn_mut().transaction()?;

            let active: Option<String> = tx
                .query_row(
                    "SELECT status FROM readings WHERE user_id = ?1 AND book_id = ?2",
                    params![user.as_str(), book.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            let finished = completed_exists(&tx, user, book)?;

            let change = match (active.is_some(), finished, new_status) {
                (_, true, LibraryStatus::Finished) => None,
                (true, _, LibraryStatus::Finished) => {
                    tx.execute(
                        "DELETE FROM readings WHERE user_id = ?1 AND book_id = ?2",
                        params![user.as_str(), book.as_str()],
                    )?;
                    tx.execute(
                        "INSERT INTO completed_readings (user_id, book_id, completed_at)
                         VALUES (?1, ?2, ?3)",
                        params![user.as_str(), book.as_str(), encode_ts(&Utc::now())],
                    )?;
                    tx.execute(
                        "UPDATE users SET books_read_count = books_read_count + 1 WHERE id = ?1",
                        params![user.as_str()],
                    )?;
                    Some(true)
                }
                (false, false, LibraryStatus::Finished) => return Err(StoreError::NotFound),
                (_, true, LibraryStatus::Active(status)) => {
                    tx.execute(
                        "DELETE FROM completed_readings WHERE user_id = ?1 AND book_id = ?2",
                        params![user.as_str(), book.as_str()],
                    )?;
                    tx.execute(
                        "INSERT INTO readings (user_id, book_id, status, started_at)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![
                            user.as_str(),
                            book.as_str(),
                            status.as_str(),
                            encode_ts(&Utc::now())
                        ],
                    )?;
                    tx.execute(
                        "UPDATE users SET books_read_count = books_read_count - 1 WHERE id = ?1",
                        params![user.as_str()],
                    )?;
                    Some(false)
                }
                (_, false, LibraryStatus::Active(status)) => {
                    // Covers both plain status updates and fresh entries.
                    tx.execute(
                        "INSERT INTO readings (user_id, book_id, status, started_at)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(user_id, book_id) DO UPDATE SET status = excluded.status",
                        params![
                            user.as_str(),
                            book.as_str(),
                            status.as_str(),
                            encode_ts(&Utc::now())
                        ],
                    )?;
                    None
                }
            };

            tx.commit()?;
            change
        };

        if let Some(completed) = completion_change {
            tracing::debug!(user = %user, book = %book, completed, "reading completion changed");
            self.bus().publish(StoreEvent::ReadingCompletionChanged {
                user: user.clone(),
                book: book.clone(),
                completed,
            });
        }
        Ok(())
    }

    /// Current library status of the pair, if any entry exists.
    pub fn library_status(&self, user: &UserId, book: &BookId) -> Result<Option<LibraryStatus>> {
        if completed_exists(self.conn(), user, book)? {
            return Ok(Some(LibraryStatus::Finished));
        }
        let active: Option<String> = self
            .conn()
            .query_row(
                "SELECT status FROM readings WHERE user_id = ?1 AND book_id = ?2",
                params![user.as_str(), book.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match active {
            Some(s) => {
                let status = ReadingStatus::from_str(&s)
                    .ok_or_else(|| StoreError::Migration(format!("unknown reading status: {s}")))?;
                Ok(Some(LibraryStatus::Active(status)))
            }
            None => Ok(None),
        }
    }

    /// Fetch the active entry for the pair.
    pub fn get_reading(&self, user: &UserId, book: &BookId) -> Result<Reading> {
        self.conn()
            .query_row(
                "SELECT user_id, book_id, status, started_at
                 FROM readings WHERE user_id = ?1 AND book_id = ?2",
                params![user.as_str(), book.as_str()],
                row_to_reading,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// All completed readings of a user, newest first.
    pub fn list_completed_readings(&self, user: &UserId) -> Result<Vec<CompletedReading>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, book_id, completed_at
             FROM completed_readings WHERE user_id = ?1 ORDER BY completed_at DESC",
        )?;
        let rows = stmt.query_map(params![user.as_str()], |row| {
            let completed_str: String = row.get(2)?;
            Ok(CompletedReading {
                user_id: UserId(row.get::<_, String>(0)?),
                book_id: BookId(row.get::<_, String>(1)?),
                completed_at: decode_ts(2, &completed_str)?,
            })
        })?;

        let mut readings = Vec::new();
        for row in rows {
            readings.push(row?);
        }
        Ok(readings)
    }

    // ------------------------------------------------------------------
    // Reading progress (client-local, outside the consistency engine)
    // ------------------------------------------------------------------

    /// Remember the last-read page.  Plain upsert, no events.
    pub fn set_reading_progress(&self, user: &UserId, book: &BookId, page: i64) -> Result<()> {
        self.conn().execute(
            "INSERT INTO reading_progress (user_id, book_id, last_page, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, book_id) DO UPDATE SET
                 last_page = excluded.last_page,
                 updated_at = excluded.updated_at",
            params![user.as_str(), book.as_str(), page, encode_ts(&Utc::now())],
        )?;
        Ok(())
    }

    /// Last-read page, if one was ever recorded.
    pub fn get_reading_progress(
        &self,
        user: &UserId,
        book: &BookId,
    ) -> Result<Option<ReadingProgress>> {
        self.conn()
            .query_row(
                "SELECT user_id, book_id, last_page, updated_at
                 FROM reading_progress WHERE user_id = ?1 AND book_id = ?2",
                params![user.as_str(), book.as_str()],
                |row| {
                    let updated_str: String = row.get(3)?;
                    Ok(ReadingProgress {
                        user_id: UserId(row.get::<_, String>(0)?),
                        book_id: BookId(row.get::<_, String>(1)?),
                        last_page: row.get(2)?,
                        updated_at: decode_ts(3, &updated_str)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::Sqlite)
    }
}

fn completed_exists(conn: &Connection, user: &UserId, book: &BookId) -> Result<bool> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM completed_readings WHERE user_id = ?1 AND book_id = ?2",
            params![user.as_str(), book.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(exists.is_some())
}

/// Map a `rusqlite::Row` to a [`Reading`].
fn row_to_reading(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reading> {
    let status_str: String = row.get::<_, String>(2)?;
    let status = ReadingStatus::from_str(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown reading status: {status_str}").into(),
        )
    })?;
    let started_str: String = row.get(3)?;

    Ok(Reading {
        user_id: UserId(row.get::<_, String>(0)?),
        book_id: BookId(row.get::<_, String>(1)?),
        status,
        started_at: decode_ts(3, &started_str)?,
    })
}
