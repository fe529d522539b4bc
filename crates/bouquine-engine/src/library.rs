//! Personal library commands: reading statuses, completions and the
//! client-local reading position.
//!
//! Finishing a book is the one transition with side effects: the active
//! entry is swapped for a completed record and `books_read_count` moves,
//! all in one store transaction.  The service only adds identity checks
//! and transition validation on top.

use std::sync::Arc;

use bouquine_shared::{BookId, LibraryStatus, ReadingStatus, UserId};
use bouquine_store::{CompletedReading, Reading, ReadingProgress};

use crate::providers::AuthProvider;
use crate::{lock_db, EngineError, Result, SharedDb};

/// Library commands bound to the signed-in user.
pub struct LibraryService {
    db: SharedDb,
    auth: Arc<dyn AuthProvider>,
}

impl LibraryService {
    pub fn new(db: SharedDb, auth: Arc<dyn AuthProvider>) -> Self {
        Self { db, auth }
    }

    fn me(&self) -> Result<UserId> {
        self.auth.current_user().ok_or(EngineError::NotAuthenticated)
    }

    /// Add a book to the library (or change its active status).
    pub async fn set_status(&self, book: &BookId, status: ReadingStatus) -> Result<()> {
        let me = self.me()?;
        let book = BookId::parse(book.as_str())?;
        lock_db(&self.db)?.set_library_status(&me, &book, LibraryStatus::Active(status))?;
        Ok(())
    }

    /// Shorthand for starting to read a book.
    pub async fn start_reading(&self, book: &BookId) -> Result<()> {
        self.set_status(book, ReadingStatus::Reading).await
    }

    /// Mark a book finished.  Requires an active entry; finishing a book
    /// that was never in the library is an error, and finishing twice is
    /// reported as [`EngineError::AlreadyInState`].
    pub async fn finish_book(&self, book: &BookId) -> Result<()> {
        let me = self.me()?;
        let book = BookId::parse(book.as_str())?;

        let mut db = lock_db(&self.db)?;
        match db.library_status(&me, &book)? {
            Some(LibraryStatus::Finished) => {
                return Err(EngineError::AlreadyInState("book is already finished"));
            }
            Some(LibraryStatus::Active(_)) => {}
            None => return Err(EngineError::NotFound("library entry")),
        }
        db.complete_reading(&me, &book)?;
        tracing::debug!(user = %me, book = %book, "book finished");
        Ok(())
    }

    /// Move a finished book back to an active status.  Only valid on a
    /// finished book; the completion counter gives its point back in the
    /// same transaction.
    pub async fn unfinish_book(&self, book: &BookId, back_to: ReadingStatus) -> Result<()> {
        let me = self.me()?;
        let book = BookId::parse(book.as_str())?;

        let mut db = lock_db(&self.db)?;
        match db.library_status(&me, &book)? {
            Some(LibraryStatus::Finished) => {}
            Some(LibraryStatus::Active(_)) => {
                return Err(EngineError::AlreadyInState("book is not finished"));
            }
            None => return Err(EngineError::NotFound("library entry")),
        }
        db.uncomplete_reading(&me, &book, back_to)?;
        Ok(())
    }

    /// Current status of a book in the signed-in user's library, if any.
    pub fn status_of(&self, book: &BookId) -> Result<Option<LibraryStatus>> {
        let me = self.me()?;
        let status = lock_db(&self.db)?.library_status(&me, book)?;
        Ok(status)
    }

    pub fn active_reading(&self, book: &BookId) -> Result<Reading> {
        let me = self.me()?;
        let reading = lock_db(&self.db)?.get_reading(&me, book)?;
        Ok(reading)
    }

    /// Another user's completed shelf, newest first.  Drives the
    /// books-read count shown on profiles.
    pub fn completed_shelf(&self, of: &UserId) -> Result<Vec<CompletedReading>> {
        self.me()?;
        let shelf = lock_db(&self.db)?.list_completed_readings(of)?;
        Ok(shelf)
    }

    // ------------------------------------------------------------------
    // Reading position (device-local, no events, no counters)
    // ------------------------------------------------------------------

    pub fn remember_page(&self, book: &BookId, page: i64) -> Result<()> {
        let me = self.me()?;
        let book = BookId::parse(book.as_str())?;
        if page < 0 {
            return Err(EngineError::InvalidArgument(
                "page number must be non-negative".into(),
            ));
        }
        lock_db(&self.db)?.set_reading_progress(&me, &book, page)?;
        Ok(())
    }

    pub fn last_page(&self, book: &BookId) -> Result<Option<ReadingProgress>> {
        let me = self.me()?;
        let progress = lock_db(&self.db)?.get_reading_progress(&me, book)?;
        Ok(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::LocalAuth;
    use bouquine_store::{Database, User};
    use chrono::Utc;
    use std::sync::Mutex;

    fn open_service(user: &str) -> (tempfile::TempDir, SharedDb, LibraryService) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        let now = Utc::now();
        db.upsert_user(&User {
            id: UserId(user.to_string()),
            display_name: user.to_uppercase(),
            avatar_url: None,
            bio: None,
            following_count: 0,
            followers_count: 0,
            books_read_count: 0,
            online: false,
            last_seen_at: now,
            created_at: now,
        })
        .unwrap();
        let db = Arc::new(Mutex::new(db));
        let service = LibraryService::new(
            db.clone(),
            Arc::new(LocalAuth::signed_in(UserId(user.into()))),
        );
        (dir, db, service)
    }

    fn books_read(db: &SharedDb, user: &str) -> i64 {
        db.lock()
            .unwrap()
            .get_user(&UserId(user.into()))
            .unwrap()
            .books_read_count
    }

    #[tokio::test]
    async fn finishing_moves_the_entry_and_the_counter_once() {
        let (_dir, db, lib) = open_service("ada");
        let book = BookId("dune".into());

        lib.start_reading(&book).await.unwrap();
        assert_eq!(
            lib.status_of(&book).unwrap(),
            Some(LibraryStatus::Active(ReadingStatus::Reading))
        );
        assert_eq!(books_read(&db, "ada"), 0);

        lib.finish_book(&book).await.unwrap();
        assert_eq!(lib.status_of(&book).unwrap(), Some(LibraryStatus::Finished));
        assert_eq!(books_read(&db, "ada"), 1);
        // The active entry is gone, not just relabeled.
        assert!(lib.active_reading(&book).is_err());

        // Finishing again is a strict error and awards nothing.
        assert!(matches!(
            lib.finish_book(&book).await,
            Err(EngineError::AlreadyInState(_))
        ));
        assert_eq!(books_read(&db, "ada"), 1);
    }

    #[tokio::test]
    async fn unfinishing_gives_the_point_back() {
        let (_dir, db, lib) = open_service("ada");
        let book = BookId("dune".into());

        lib.start_reading(&book).await.unwrap();
        lib.finish_book(&book).await.unwrap();
        lib.unfinish_book(&book, ReadingStatus::Paused).await.unwrap();

        assert_eq!(
            lib.status_of(&book).unwrap(),
            Some(LibraryStatus::Active(ReadingStatus::Paused))
        );
        assert_eq!(books_read(&db, "ada"), 0);

        // Unfinishing an active book is a strict error.
        assert!(matches!(
            lib.unfinish_book(&book, ReadingStatus::Reading).await,
            Err(EngineError::AlreadyInState(_))
        ));
    }

    #[tokio::test]
    async fn finishing_an_unknown_book_is_rejected() {
        let (_dir, db, lib) = open_service("ada");
        let book = BookId("ghost".into());

        assert!(matches!(
            lib.finish_book(&book).await,
            Err(EngineError::NotFound(_))
        ));
        assert_eq!(books_read(&db, "ada"), 0);
    }

    #[tokio::test]
    async fn page_position_is_a_plain_local_note() {
        let (_dir, _db, lib) = open_service("ada");
        let book = BookId("dune".into());

        assert!(lib.last_page(&book).unwrap().is_none());
        lib.remember_page(&book, 42).unwrap();
        lib.remember_page(&book, 57).unwrap();
        assert_eq!(lib.last_page(&book).unwrap().unwrap().last_page, 57);

        assert!(matches!(
            lib.remember_page(&book, -1),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            lib.remember_page(&BookId("  ".into()), 1),
            Err(EngineError::InvalidArgument(_))
        ));
    }
}
