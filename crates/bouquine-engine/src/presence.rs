//! Ephemeral per-user presence: the typing indicator and the
//! active-participant flag.
//!
//! Typing is debounced: the first non-empty keystroke publishes `true`
//! once, every further keystroke re-arms an inactivity timer, and the
//! timer's expiry (or empty input, or backgrounding) publishes `false`
//! once.  Publishes are idempotent-guarded against the last published
//! value so a burst of keystrokes costs one store write, not one per key.
//!
//! Publish failures are logged and swallowed: typing state is ephemeral
//! and a missed indicator update must never fail a user command.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bouquine_shared::constants::TYPING_TIMEOUT_MS;
use bouquine_shared::{ConversationId, UserId};
use tokio::task::JoinHandle;

use crate::{lock_db, Result, SharedDb};

struct TypingState {
    last_published: Option<bool>,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    db: SharedDb,
    conversation_id: ConversationId,
    user: UserId,
    timeout: Duration,
    state: Mutex<TypingState>,
}

impl Inner {
    /// Guarded publish: skipped when `typing` equals the last published
    /// value.
    fn publish(&self, typing: bool) {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => return,
        };
        if state.last_published == Some(typing) {
            return;
        }
        state.last_published = Some(typing);
        drop(state);

        let result = lock_db(&self.db)
            .and_then(|db| Ok(db.set_typing(&self.conversation_id, &self.user, typing)?));
        if let Err(e) = result {
            tracing::warn!(
                conversation = %self.conversation_id,
                typing,
                error = %e,
                "failed to publish typing state"
            );
        }
    }

    fn cancel_timer(&self) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
        }
    }
}

/// Debounced publisher of one participant's typing flag.
pub struct TypingPublisher {
    inner: Arc<Inner>,
}

impl TypingPublisher {
    pub fn new(db: SharedDb, conversation_id: ConversationId, user: UserId) -> Self {
        Self::with_timeout(
            db,
            conversation_id,
            user,
            Duration::from_millis(TYPING_TIMEOUT_MS),
        )
    }

    pub fn with_timeout(
        db: SharedDb,
        conversation_id: ConversationId,
        user: UserId,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                conversation_id,
                user,
                timeout,
                state: Mutex::new(TypingState {
                    last_published: None,
                    timer: None,
                }),
            }),
        }
    }

    /// Feed one keystroke's worth of input.  Empty input stops typing
    /// immediately; non-empty input publishes `true` (once) and re-arms
    /// the inactivity timer.
    pub fn on_input(&self, text: &str) {
        if text.trim().is_empty() {
            self.stop();
            return;
        }

        self.inner.publish(true);

        // Re-arm: the previous timer must not fire a stale "stopped".
        self.inner.cancel_timer();
        let inner = Arc::clone(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(inner.timeout).await;
            inner.publish(false);
        });
        if let Ok(mut state) = self.inner.state.lock() {
            state.timer = Some(timer);
        }
    }

    /// Publish `false` now and cancel the pending timer.  Called on empty
    /// input, on screen backgrounding and on session close.
    pub fn stop(&self) {
        self.inner.cancel_timer();
        self.inner.publish(false);
    }
}

impl Drop for TypingPublisher {
    fn drop(&mut self) {
        // A stale timer must not outlive the screen that owned it.
        self.inner.cancel_timer();
    }
}

/// Idempotently add or remove a participant from the conversation's
/// active set (foreground presence).  Returns whether the store state
/// actually changed.
pub fn set_active(
    db: &SharedDb,
    conversation_id: &ConversationId,
    user: &UserId,
    active: bool,
) -> Result<bool> {
    let changed = lock_db(db)?.set_active(conversation_id, user, active)?;
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bouquine_store::Database;

    fn setup() -> (tempfile::TempDir, SharedDb, ConversationId, UserId, UserId) {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Database::open_at(&dir.path().join("test.db")).unwrap();

        let now = chrono::Utc::now();
        for id in ["ada", "zoe"] {
            db.upsert_user(&bouquine_store::User {
                id: UserId(id.into()),
                display_name: id.into(),
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
        }
        let ada = UserId("ada".into());
        let zoe = UserId("zoe".into());
        let (conv, _) = db.get_or_create_conversation(&ada, &zoe).unwrap();
        (dir, Arc::new(Mutex::new(db)), conv, ada, zoe)
    }

    fn typing_flag(db: &SharedDb, conv: &ConversationId, user: &UserId) -> bool {
        db.lock().unwrap().get_member(conv, user).unwrap().typing
    }

    #[tokio::test(start_paused = true)]
    async fn keystrokes_publish_once_and_timeout_clears() {
        let (_dir, db, conv, ada, _) = setup();
        let publisher =
            TypingPublisher::with_timeout(db.clone(), conv.clone(), ada.clone(), Duration::from_millis(100));

        publisher.on_input("s");
        publisher.on_input("sa");
        publisher.on_input("sal");
        assert!(typing_flag(&db, &conv, &ada));

        // Idle past the window: the timer publishes false.
        tokio::time::sleep(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;
        assert!(!typing_flag(&db, &conv, &ada));
    }

    #[tokio::test(start_paused = true)]
    async fn further_keystrokes_rearm_the_timer() {
        let (_dir, db, conv, ada, _) = setup();
        let publisher =
            TypingPublisher::with_timeout(db.clone(), conv.clone(), ada.clone(), Duration::from_millis(100));

        publisher.on_input("b");
        tokio::time::sleep(Duration::from_millis(80)).await;
        // Still inside the window: re-arm.
        publisher.on_input("bo");
        tokio::time::sleep(Duration::from_millis(80)).await;
        tokio::task::yield_now().await;
        assert!(typing_flag(&db, &conv, &ada), "re-armed timer must not have fired");

        tokio::time::sleep(Duration::from_millis(40)).await;
        tokio::task::yield_now().await;
        assert!(!typing_flag(&db, &conv, &ada));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_input_and_stop_clear_immediately() {
        let (_dir, db, conv, ada, _) = setup();
        let publisher = TypingPublisher::new(db.clone(), conv.clone(), ada.clone());

        publisher.on_input("salut");
        assert!(typing_flag(&db, &conv, &ada));

        publisher.on_input("");
        assert!(!typing_flag(&db, &conv, &ada));

        // Backgrounding mid-typing cancels the stale timer.
        publisher.on_input("re");
        publisher.stop();
        assert!(!typing_flag(&db, &conv, &ada));
    }

    #[tokio::test]
    async fn active_presence_is_idempotent() {
        let (_dir, db, conv, _, zoe) = setup();

        assert!(set_active(&db, &conv, &zoe, true).unwrap());
        assert!(!set_active(&db, &conv, &zoe, true).unwrap());
        assert!(set_active(&db, &conv, &zoe, false).unwrap());
        assert!(!set_active(&db, &conv, &zoe, false).unwrap());
    }
}
