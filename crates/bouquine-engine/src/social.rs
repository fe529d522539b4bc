//! Social graph commands: follows, likes and book comments.
//!
//! Every toggle goes through a single store transaction, so the counters
//! on user and comment rows always equal the size of the set they
//! summarize.  The watch helpers expose those facts reactively; their
//! feeder tasks exit as soon as the last receiver is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use bouquine_shared::constants::{MAX_MESSAGE_LEN, USER_LOOKUP_CHUNK};
use bouquine_shared::{BookId, CommentId, ToggleOutcome, UserId};
use bouquine_store::{Comment, StoreEvent, User};
use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::providers::AuthProvider;
use crate::{lock_db, EngineError, Result, SharedDb};

/// Follow and like commands bound to the signed-in user.
pub struct SocialService {
    db: SharedDb,
    auth: Arc<dyn AuthProvider>,
}

impl SocialService {
    pub fn new(db: SharedDb, auth: Arc<dyn AuthProvider>) -> Self {
        Self { db, auth }
    }

    fn me(&self) -> Result<UserId> {
        self.auth.current_user().ok_or(EngineError::NotAuthenticated)
    }

    // ------------------------------------------------------------------
    // Follows
    // ------------------------------------------------------------------

    /// Follow or unfollow `target`.  Both users' counters move in the
    /// same transaction as the edge itself.
    pub async fn toggle_follow(&self, target: &UserId) -> Result<ToggleOutcome> {
        let me = self.me()?;
        let target = UserId::parse(target.as_str())?;
        if target == me {
            return Err(EngineError::InvalidArgument(
                "cannot follow yourself".into(),
            ));
        }
        let outcome = lock_db(&self.db)?.toggle_follow(&me, &target)?;
        tracing::debug!(follower = %me, followee = %target, ?outcome, "follow toggled");
        Ok(outcome)
    }

    pub fn is_following(&self, target: &UserId) -> Result<bool> {
        let me = self.me()?;
        let following = lock_db(&self.db)?.is_following(&me, target)?;
        Ok(following)
    }

    /// Users following `of`, hydrated to full profiles, newest edge first.
    pub async fn followers(&self, of: &UserId) -> Result<Vec<User>> {
        self.me()?;
        let ids: Vec<UserId> = lock_db(&self.db)?
            .list_followers(of)?
            .into_iter()
            .map(|edge| edge.follower_id)
            .collect();
        self.hydrate(ids).await
    }

    /// Users that `of` follows, hydrated to full profiles, newest edge
    /// first.
    pub async fn following(&self, of: &UserId) -> Result<Vec<User>> {
        self.me()?;
        let ids: Vec<UserId> = lock_db(&self.db)?
            .list_following(of)?
            .into_iter()
            .map(|edge| edge.followee_id)
            .collect();
        self.hydrate(ids).await
    }

    /// Profile lookup in fixed-size chunks, fanned out as parallel tasks.
    /// Edge order is restored afterwards: the store is free to return a
    /// chunk's rows in any order.
    async fn hydrate(&self, ids: Vec<UserId>) -> Result<Vec<User>> {
        let tasks: Vec<_> = ids
            .chunks(USER_LOOKUP_CHUNK)
            .map(|chunk| {
                let db = self.db.clone();
                let chunk = chunk.to_vec();
                tokio::spawn(async move {
                    lock_db(&db)?.get_users(&chunk).map_err(EngineError::from)
                })
            })
            .collect();

        let mut by_id: HashMap<UserId, User> = HashMap::with_capacity(ids.len());
        let chunks = futures::future::try_join_all(tasks)
            .await
            .map_err(|e| EngineError::Transport(format!("lookup task failed: {e}")))?;
        for users in chunks {
            for user in users? {
                by_id.insert(user.id.clone(), user);
            }
        }

        // Edges pointing at users that vanished mid-lookup are skipped.
        Ok(ids.into_iter().filter_map(|id| by_id.remove(&id)).collect())
    }

    /// Reactive view of "do I follow `target`", fed from committed
    /// follow events.  On overflow the value is re-read from the store
    /// instead of trusting the skipped events.
    pub fn watch_follow(&self, target: &UserId) -> Result<watch::Receiver<bool>> {
        let me = self.me()?;
        let target = target.clone();

        let (initial, mut events) = {
            let db = lock_db(&self.db)?;
            let events = db.bus().subscribe();
            (db.is_following(&me, &target)?, events)
        };

        let (tx, rx) = watch::channel(initial);
        let db = self.db.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(StoreEvent::FollowToggled {
                        follower,
                        followee,
                        outcome,
                    }) if follower == me && followee == target => {
                        if tx.send(outcome == ToggleOutcome::Added).is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                        let Ok(current) =
                            lock_db(&db).and_then(|db| Ok(db.is_following(&me, &target)?))
                        else {
                            return;
                        };
                        if tx.send(current).is_err() {
                            return;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        });
        Ok(rx)
    }

    /// Reactive profile counters for `user` (follower, following and
    /// books-read counts), refreshed whenever a committed event touches
    /// them.
    pub fn watch_profile(&self, user: &UserId) -> Result<watch::Receiver<User>> {
        self.me()?;
        let user = user.clone();

        let (initial, mut events) = {
            let db = lock_db(&self.db)?;
            let events = db.bus().subscribe();
            (db.get_user(&user)?, events)
        };

        let (tx, rx) = watch::channel(initial);
        let db = self.db.clone();
        tokio::spawn(async move {
            loop {
                let touched = match events.recv().await {
                    Ok(StoreEvent::FollowToggled {
                        follower, followee, ..
                    }) => follower == user || followee == user,
                    Ok(StoreEvent::ReadingCompletionChanged { user: who, .. }) => who == user,
                    Ok(_) => false,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => true,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                };
                if !touched {
                    continue;
                }
                let Ok(profile) = lock_db(&db).and_then(|db| Ok(db.get_user(&user)?)) else {
                    return;
                };
                if tx.send(profile).is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    // ------------------------------------------------------------------
    // Likes & comments
    // ------------------------------------------------------------------

    /// Like or unlike another user's reading of a book.  The reading must
    /// exist (active or completed).
    pub async fn toggle_reading_like(
        &self,
        target_user: &UserId,
        book: &BookId,
    ) -> Result<ToggleOutcome> {
        let me = self.me()?;
        let target_user = UserId::parse(target_user.as_str())?;
        let book = BookId::parse(book.as_str())?;
        let outcome = lock_db(&self.db)?.toggle_reading_like(&target_user, &book, &me)?;
        Ok(outcome)
    }

    pub fn is_reading_liked(&self, target_user: &UserId, book: &BookId) -> Result<bool> {
        let me = self.me()?;
        let liked = lock_db(&self.db)?.is_reading_liked(target_user, book, &me)?;
        Ok(liked)
    }

    pub fn count_reading_likes(&self, target_user: &UserId, book: &BookId) -> Result<i64> {
        self.me()?;
        let count = lock_db(&self.db)?.count_reading_likes(target_user, book)?;
        Ok(count)
    }

    /// Post a comment on a book page.
    pub async fn post_comment(&self, book: &BookId, text: &str) -> Result<Comment> {
        let me = self.me()?;
        let book = BookId::parse(book.as_str())?;
        let text = text.trim();
        if text.is_empty() {
            return Err(EngineError::InvalidArgument("empty comment text".into()));
        }
        if text.chars().count() > MAX_MESSAGE_LEN {
            return Err(EngineError::InvalidArgument(format!(
                "comment exceeds {MAX_MESSAGE_LEN} characters"
            )));
        }

        let comment = Comment {
            id: CommentId(Uuid::new_v4()),
            book_id: book,
            author_id: me,
            text: text.to_string(),
            likes_count: 0,
            last_like_at: None,
            created_at: Utc::now(),
        };
        lock_db(&self.db)?.create_comment(&comment)?;
        Ok(comment)
    }

    pub fn comments_for_book(&self, book: &BookId) -> Result<Vec<Comment>> {
        self.me()?;
        let comments = lock_db(&self.db)?.list_comments_for_book(book)?;
        Ok(comments)
    }

    pub fn is_comment_liked(&self, comment: &CommentId) -> Result<bool> {
        let me = self.me()?;
        let liked = lock_db(&self.db)?.is_comment_liked(comment, &me)?;
        Ok(liked)
    }

    pub fn count_comment_likes(&self, comment: &CommentId) -> Result<i64> {
        self.me()?;
        let count = lock_db(&self.db)?.count_comment_likes(comment)?;
        Ok(count)
    }

    /// Like or unlike a comment.  The comment's `likes_count` moves with
    /// the like row in one transaction.
    pub async fn toggle_comment_like(&self, comment: &CommentId) -> Result<ToggleOutcome> {
        let me = self.me()?;
        let outcome = lock_db(&self.db)?
            .toggle_comment_like(comment, &me)
            .map_err(|e| match e {
                bouquine_store::StoreError::NotFound => EngineError::NotFound("comment"),
                other => other.into(),
            })?;
        Ok(outcome)
    }
}
