//! Chat sessions: one open conversation screen's worth of state.
//!
//! [`ChatService::open`] performs the get-or-create → initial-load →
//! subscribe cycle and hands back a [`ChatSession`] owning the live-tail
//! task.  The session's commands write through the store; the in-memory
//! timeline is only ever updated from committed change events, so a
//! failed command can never leave the screen showing a state the store
//! never held.  Closing (or dropping) the session cancels the tail
//! exactly once; a tail that dies is reported via [`TailState`] and is
//! never silently re-established.

use std::sync::{Arc, Mutex};

use bouquine_shared::constants::{HISTORY_PAGE_SIZE, MAX_MESSAGE_LEN};
use bouquine_shared::{
    ChallengeId, ConversationId, MessageId, ReactionOutcome, UserId,
};
use bouquine_store::messages::MessageDraft;
use bouquine_store::{Conversation, ConversationMember, ReplyRef, StoreEvent};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::affinity::Affinity;
use crate::presence::{self, TypingPublisher};
use crate::providers::{AuthProvider, ObjectStore};
use crate::timeline::{Timeline, TimelineItem};
use crate::{lock_db, EngineError, Result, SharedDb};

/// Health of the live subscription.  `Lagged` is recoverable (events were
/// skipped, the timeline may be missing refreshes until the next one);
/// `Lost` is terminal for this session — recovery is a fresh
/// [`ChatService::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    Live,
    Lagged(u64),
    Lost,
}

/// Entry point for conversations, bound to the signed-in user.
pub struct ChatService {
    db: SharedDb,
    auth: Arc<dyn AuthProvider>,
    objects: Arc<dyn ObjectStore>,
}

impl ChatService {
    pub fn new(db: SharedDb, auth: Arc<dyn AuthProvider>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { db, auth, objects }
    }

    fn me(&self) -> Result<UserId> {
        self.auth.current_user().ok_or(EngineError::NotAuthenticated)
    }

    /// The signed-in user's conversation list, most recently active first,
    /// paired with their own member row (unread counter, flags).
    pub fn list_conversations(&self) -> Result<Vec<(Conversation, ConversationMember)>> {
        let me = self.me()?;
        let list = lock_db(&self.db)?.list_conversations_for_user(&me)?;
        Ok(list)
    }

    /// Bulk deletion from the conversation list.  Hard delete; messages
    /// and challenge completions go with it.
    pub fn delete_conversation(&self, id: &ConversationId) -> Result<bool> {
        self.me()?;
        let deleted = lock_db(&self.db)?.delete_conversation(id)?;
        Ok(deleted)
    }

    /// Open (creating if needed) the conversation with `peer` and start
    /// its live tail.
    ///
    /// The change-bus subscription is taken under the same store lock as
    /// the initial page read, so no committed message can fall between
    /// "loaded as history" and "delivered as live".
    pub async fn open(&self, peer: &UserId) -> Result<ChatSession> {
        let me = self.me()?;
        let peer = UserId::parse(peer.as_str())?;
        if peer == me {
            return Err(EngineError::InvalidArgument(
                "cannot open a conversation with yourself".into(),
            ));
        }

        let (conversation_id, timeline, events) = {
            let mut db = lock_db(&self.db)?;
            let (id, _created) = db.get_or_create_conversation(&me, &peer)?;
            let events = db.bus().subscribe();
            let page = db.get_messages_before(&id, None, HISTORY_PAGE_SIZE)?;

            let mut timeline = Timeline::new(HISTORY_PAGE_SIZE);
            timeline.ingest_initial(page);
            (id, timeline, events)
        };

        tracing::debug!(conversation = %conversation_id, user = %me, "chat session opened");

        let initial_items = timeline.render();
        let timeline = Arc::new(Mutex::new(timeline));
        let items_tx = Arc::new(watch::channel(initial_items).0);
        let tail_tx = Arc::new(watch::channel(TailState::Live).0);

        let tail = tokio::spawn(run_tail(
            events,
            conversation_id.clone(),
            Arc::clone(&timeline),
            Arc::clone(&items_tx),
            Arc::clone(&tail_tx),
        ));

        let typing = TypingPublisher::new(self.db.clone(), conversation_id.clone(), me.clone());

        Ok(ChatSession {
            conversation_id,
            me,
            peer,
            db: self.db.clone(),
            objects: Arc::clone(&self.objects),
            timeline,
            items_tx,
            tail_tx,
            tail: Some(tail),
            typing,
        })
    }
}

/// The live-tail task: merge this conversation's committed message
/// changes into the timeline and re-render on every effective change.
async fn run_tail(
    mut events: broadcast::Receiver<StoreEvent>,
    conversation_id: ConversationId,
    timeline: Arc<Mutex<Timeline>>,
    items_tx: Arc<watch::Sender<Vec<TimelineItem>>>,
    tail_tx: Arc<watch::Sender<TailState>>,
) {
    loop {
        match events.recv().await {
            Ok(StoreEvent::Message(change)) => {
                if change.message.conversation_id != conversation_id {
                    continue;
                }
                let rendered = {
                    let Ok(mut timeline) = timeline.lock() else {
                        tail_tx.send_replace(TailState::Lost);
                        return;
                    };
                    if timeline.apply(&change) {
                        Some(timeline.render())
                    } else {
                        None
                    }
                };
                if let Some(items) = rendered {
                    items_tx.send_replace(items);
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Recoverable: events were dropped, keep listening.
                tracing::warn!(conversation = %conversation_id, skipped, "live tail lagged");
                tail_tx.send_replace(TailState::Lagged(skipped));
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::warn!(conversation = %conversation_id, "live tail closed");
                tail_tx.send_replace(TailState::Lost);
                return;
            }
        }
    }
}

/// One open conversation: merged timeline plus the message commands.
pub struct ChatSession {
    conversation_id: ConversationId,
    me: UserId,
    peer: UserId,
    db: SharedDb,
    objects: Arc<dyn ObjectStore>,
    timeline: Arc<Mutex<Timeline>>,
    items_tx: Arc<watch::Sender<Vec<TimelineItem>>>,
    tail_tx: Arc<watch::Sender<TailState>>,
    tail: Option<JoinHandle<()>>,
    typing: TypingPublisher,
}

impl ChatSession {
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub fn peer(&self) -> &UserId {
        &self.peer
    }

    /// Reactive rendered timeline (messages + date separators).
    pub fn timeline(&self) -> watch::Receiver<Vec<TimelineItem>> {
        self.items_tx.subscribe()
    }

    /// Reactive live-subscription health.
    pub fn tail_state(&self) -> watch::Receiver<TailState> {
        self.tail_tx.subscribe()
    }

    // ------------------------------------------------------------------
    // Message commands
    // ------------------------------------------------------------------

    /// Send a text message.  Never auto-retried on failure: a retry would
    /// duplicate the message.
    pub async fn send_message(&self, text: &str) -> Result<MessageId> {
        let text = validated_text(text)?;
        let message = lock_db(&self.db)?.send_message(self.draft(Some(text), None))?;
        Ok(message.id)
    }

    /// Upload an image to the object store, then send a message carrying
    /// its reference.
    pub async fn send_image(&self, bytes: Vec<u8>, caption: Option<&str>) -> Result<MessageId> {
        if bytes.is_empty() {
            return Err(EngineError::InvalidArgument("empty image".into()));
        }
        let caption = caption.map(validated_text).transpose()?;

        let key = format!("chat/{}/{}", self.conversation_id, Uuid::new_v4());
        let image_url = self
            .objects
            .upload(key, bytes)
            .await
            .map_err(EngineError::Transport)?;

        let message = lock_db(&self.db)?.send_message(self.draft(caption, Some(image_url)))?;
        Ok(message.id)
    }

    /// Reply to an existing message.  The preview and sender label are
    /// copied now; if the original is later deleted the reference simply
    /// goes stale (no tombstones).
    pub async fn send_reply(&self, text: &str, reply_to: &MessageId) -> Result<MessageId> {
        let text = validated_text(text)?;

        let message = {
            let mut db = lock_db(&self.db)?;
            let original = db.get_message(reply_to)?;
            if original.conversation_id != self.conversation_id {
                return Err(EngineError::NotFound("message"));
            }
            let sender_name = db.get_user(&original.sender_id)?.display_name;
            let preview = original
                .text
                .clone()
                .unwrap_or_else(|| "[photo]".to_string());

            let mut draft = self.draft(Some(text), None);
            draft.reply_to = Some(ReplyRef {
                message_id: original.id,
                preview,
                sender_name,
            });
            db.send_message(draft)?
        };
        Ok(message.id)
    }

    /// Forward a message (from any of the user's conversations) into this
    /// one, carrying the forwarded flag.
    pub async fn forward_message(&self, original: &MessageId) -> Result<MessageId> {
        let message = {
            let mut db = lock_db(&self.db)?;
            let source = db.get_message(original)?;
            let mut draft = self.draft(source.text.clone(), source.image_url.clone());
            draft.forwarded = true;
            db.send_message(draft)?
        };
        Ok(message.id)
    }

    /// Edit one of the signed-in user's own messages.  The timeline picks
    /// the change up from the committed event, never before.
    pub async fn edit_message(&self, id: &MessageId, new_text: &str) -> Result<()> {
        let new_text = validated_text(new_text)?;
        lock_db(&self.db)?
            .edit_message(id, &self.me, &new_text)
            .map_err(|e| match e {
                bouquine_store::StoreError::NotFound => EngineError::NotFound("message"),
                other => other.into(),
            })?;
        Ok(())
    }

    /// Hard-delete one of the signed-in user's own messages.
    pub async fn delete_message(&self, id: &MessageId) -> Result<()> {
        lock_db(&self.db)?.delete_message(id, &self.me)?;
        Ok(())
    }

    /// Single-slot reaction toggle: same emoji removes, different emoji
    /// replaces.
    pub async fn toggle_reaction(&self, id: &MessageId, emoji: &str) -> Result<ReactionOutcome> {
        if emoji.trim().is_empty() {
            return Err(EngineError::InvalidArgument("empty reaction emoji".into()));
        }
        let (outcome, _) = lock_db(&self.db)?.toggle_reaction(id, &self.me, emoji)?;
        Ok(outcome)
    }

    /// Zero the unread counter and flip the peer's Sent messages to Read.
    pub async fn mark_as_read(&self) -> Result<usize> {
        let changes = lock_db(&self.db)?.mark_conversation_read(&self.conversation_id, &self.me)?;
        Ok(changes.len())
    }

    /// Backfill one page of older history.  A no-op once the history is
    /// exhausted, even when invoked again.  Returns how many messages were
    /// added.
    pub async fn load_older_messages(&self) -> Result<usize> {
        let (cursor, has_more) = {
            let timeline = self.lock_timeline()?;
            (timeline.cursor(), timeline.has_more_older())
        };
        if !has_more {
            return Ok(0);
        }
        let Some(cursor) = cursor else {
            return Ok(0);
        };

        let page = lock_db(&self.db)?.get_messages_before(
            &self.conversation_id,
            Some(&cursor),
            HISTORY_PAGE_SIZE,
        )?;

        let (added, items) = {
            let mut timeline = self.lock_timeline()?;
            let added = timeline.prepend_older(page);
            (added, timeline.render())
        };
        if added > 0 {
            self.items_tx.send_replace(items);
        }
        Ok(added)
    }

    // ------------------------------------------------------------------
    // Presence & affinity
    // ------------------------------------------------------------------

    /// Feed the message composer's input; drives the debounced typing
    /// indicator.
    pub fn on_user_input(&self, text: &str) {
        self.typing.on_input(text);
    }

    /// Screen went to the background: stop typing immediately and leave
    /// the active set.  Idempotent.
    pub fn leave(&self) -> Result<()> {
        self.typing.stop();
        presence::set_active(&self.db, &self.conversation_id, &self.me, false)?;
        Ok(())
    }

    /// Screen came to the foreground: join the active set.  Idempotent.
    pub fn enter(&self) -> Result<()> {
        presence::set_active(&self.db, &self.conversation_id, &self.me, true)?;
        Ok(())
    }

    /// Record a completed challenge and award its bonus.  Returns `false`
    /// when the challenge was already completed (points no-op).
    pub async fn complete_challenge(
        &self,
        challenge: &ChallengeId,
        bonus_points: i64,
    ) -> Result<bool> {
        if bonus_points < 0 {
            return Err(EngineError::InvalidArgument(
                "bonus points must be non-negative".into(),
            ));
        }
        let newly = lock_db(&self.db)?.complete_challenge(
            &self.conversation_id,
            challenge,
            bonus_points,
        )?;
        Ok(newly)
    }

    /// Current affinity score and derived tier.
    pub fn affinity(&self) -> Result<Affinity> {
        let conversation = lock_db(&self.db)?.get_conversation(&self.conversation_id)?;
        Ok(Affinity::from_score(conversation.affinity_score))
    }

    /// Tear the session down: stop typing, leave the active set and
    /// cancel the live tail.  Idempotent; also runs on drop.
    pub fn close(&mut self) {
        self.typing.stop();
        if let Err(e) = presence::set_active(&self.db, &self.conversation_id, &self.me, false) {
            tracing::warn!(conversation = %self.conversation_id, error = %e, "failed to leave active set");
        }
        if let Some(tail) = self.tail.take() {
            tail.abort();
            tracing::debug!(conversation = %self.conversation_id, "chat session closed");
        }
    }

    fn draft(&self, text: Option<String>, image_url: Option<String>) -> MessageDraft {
        MessageDraft {
            conversation_id: self.conversation_id.clone(),
            sender_id: self.me.clone(),
            text,
            image_url,
            forwarded: false,
            reply_to: None,
        }
    }

    fn lock_timeline(&self) -> Result<std::sync::MutexGuard<'_, Timeline>> {
        self.timeline
            .lock()
            .map_err(|e| EngineError::Transport(format!("timeline lock poisoned: {e}")))
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        // The tail is cancelled exactly once, here or in close().
        if let Some(tail) = self.tail.take() {
            tail.abort();
        }
    }
}

fn validated_text(text: &str) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidArgument("empty message text".into()));
    }
    if trimmed.chars().count() > MAX_MESSAGE_LEN {
        return Err(EngineError::InvalidArgument(format!(
            "message exceeds {MAX_MESSAGE_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{LocalAuth, MemoryObjectStore};
    use bouquine_shared::DeliveryStatus;
    use bouquine_store::Database;
    use chrono::Utc;
    use std::time::Duration;

    fn init_logs() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    fn open_shared_db(users: &[&str]) -> (tempfile::TempDir, SharedDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        let now = Utc::now();
        for id in users {
            db.upsert_user(&bouquine_store::User {
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
            })
            .unwrap();
        }
        (dir, Arc::new(Mutex::new(db)))
    }

    fn service_for(db: &SharedDb, user: &str) -> ChatService {
        ChatService::new(
            db.clone(),
            Arc::new(LocalAuth::signed_in(UserId(user.into()))),
            Arc::new(MemoryObjectStore::new()),
        )
    }

    fn messages_of(items: &[TimelineItem]) -> Vec<&bouquine_store::Message> {
        items
            .iter()
            .filter_map(|item| match item {
                TimelineItem::Message(m) => Some(m),
                TimelineItem::DateSeparator { .. } => None,
            })
            .collect()
    }

    async fn next_items(
        rx: &mut watch::Receiver<Vec<TimelineItem>>,
    ) -> Vec<TimelineItem> {
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("timeline update timed out")
            .expect("timeline sender dropped");
        rx.borrow().clone()
    }

    #[tokio::test]
    async fn hello_is_delivered_live_and_transitions_to_read() {
        init_logs();
        let (_dir, db) = open_shared_db(&["ada", "zoe"]);
        let ada_svc = service_for(&db, "ada");
        let zoe_svc = service_for(&db, "zoe");

        let zoe_session = zoe_svc.open(&UserId("ada".into())).await.unwrap();
        let ada_session = ada_svc.open(&UserId("zoe".into())).await.unwrap();
        assert_eq!(zoe_session.conversation_id(), ada_session.conversation_id());

        let mut zoe_rx = zoe_session.timeline();
        let sent_id = ada_session.send_message("hello").await.unwrap();

        let items = next_items(&mut zoe_rx).await;
        let messages = messages_of(&items);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, sent_id);
        assert_eq!(messages[0].text.as_deref(), Some("hello"));
        assert_eq!(messages[0].status, DeliveryStatus::Sent);

        // Zoe marks the conversation read; both tails observe the flip.
        let mut ada_rx = ada_session.timeline();
        assert_eq!(zoe_session.mark_as_read().await.unwrap(), 1);
        let items = next_items(&mut ada_rx).await;
        assert_eq!(messages_of(&items)[0].status, DeliveryStatus::Read);
    }

    #[tokio::test]
    async fn backfill_twenty_then_seven_exhausts_history() {
        init_logs();
        let (_dir, db) = open_shared_db(&["ada", "zoe"]);

        // Seed 27 messages directly through the store.
        {
            let mut guard = db.lock().unwrap();
            let (conv, _) = guard
                .get_or_create_conversation(&UserId("ada".into()), &UserId("zoe".into()))
                .unwrap();
            for i in 0..27 {
                guard
                    .send_message(MessageDraft {
                        conversation_id: conv.clone(),
                        sender_id: UserId("ada".into()),
                        text: Some(format!("m{i}")),
                        image_url: None,
                        forwarded: false,
                        reply_to: None,
                    })
                    .unwrap();
            }
        }

        let session = service_for(&db, "zoe")
            .open(&UserId("ada".into()))
            .await
            .unwrap();

        let initial = messages_of(&session.timeline().borrow())
            .iter()
            .map(|m| m.text.clone().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(initial.len(), 20);
        assert_eq!(initial.first().map(String::as_str), Some("m7"));
        assert_eq!(initial.last().map(String::as_str), Some("m26"));

        // Short page clears has_more_older; further calls are no-ops.
        assert_eq!(session.load_older_messages().await.unwrap(), 7);
        assert_eq!(session.load_older_messages().await.unwrap(), 0);
        assert_eq!(session.load_older_messages().await.unwrap(), 0);

        let all = messages_of(&session.timeline().borrow())
            .iter()
            .map(|m| m.text.clone().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(all.len(), 27);
        assert_eq!(all.first().map(String::as_str), Some("m0"));
    }

    #[tokio::test]
    async fn updates_without_a_live_subscriber_reach_the_next_one() {
        init_logs();
        let (_dir, db) = open_shared_db(&["ada", "zoe"]);
        {
            let mut guard = db.lock().unwrap();
            let (conv, _) = guard
                .get_or_create_conversation(&UserId("ada".into()), &UserId("zoe".into()))
                .unwrap();
            for i in 0..25 {
                guard
                    .send_message(MessageDraft {
                        conversation_id: conv.clone(),
                        sender_id: UserId("ada".into()),
                        text: Some(format!("m{i}")),
                        image_url: None,
                        forwarded: false,
                        reply_to: None,
                    })
                    .unwrap();
            }
        }

        let session = service_for(&db, "zoe")
            .open(&UserId("ada".into()))
            .await
            .unwrap();

        // Nobody is watching the timeline while the backfill lands.
        assert_eq!(session.load_older_messages().await.unwrap(), 5);

        // A subscriber created afterwards still sees the full buffer.
        let rx = session.timeline();
        assert_eq!(messages_of(&rx.borrow()).len(), 25);
    }

    #[tokio::test]
    async fn image_messages_carry_an_uploaded_reference() {
        init_logs();
        let (_dir, db) = open_shared_db(&["ada", "zoe"]);
        let store = Arc::new(MemoryObjectStore::new());
        let session = ChatService::new(
            db.clone(),
            Arc::new(LocalAuth::signed_in(UserId("ada".into()))),
            Arc::clone(&store) as Arc<dyn ObjectStore>,
        )
        .open(&UserId("zoe".into()))
        .await
        .unwrap();

        let id = session
            .send_image(vec![0xff, 0xd8, 0xff], Some("ma pile à lire"))
            .await
            .unwrap();

        let message = db.lock().unwrap().get_message(&id).unwrap();
        let url = message.image_url.expect("image message must carry a url");
        assert!(url.starts_with("mem://chat/"));
        assert_eq!(message.text.as_deref(), Some("ma pile à lire"));
        assert_eq!(
            store.get(url.trim_start_matches("mem://")).as_deref(),
            Some(&[0xff, 0xd8, 0xff][..])
        );

        assert!(matches!(
            session.send_image(Vec::new(), None).await,
            Err(EngineError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_opens_converge_on_one_conversation() {
        init_logs();
        let (_dir, db) = open_shared_db(&["ada", "zoe"]);
        let ada_svc = Arc::new(service_for(&db, "ada"));
        let zoe_svc = Arc::new(service_for(&db, "zoe"));

        let a = {
            let svc = Arc::clone(&ada_svc);
            tokio::spawn(async move { svc.open(&UserId("zoe".into())).await.unwrap() })
        };
        let b = {
            let svc = Arc::clone(&zoe_svc);
            tokio::spawn(async move { svc.open(&UserId("ada".into())).await.unwrap() })
        };
        let (sa, sb) = (a.await.unwrap(), b.await.unwrap());
        assert_eq!(sa.conversation_id(), sb.conversation_id());

        let count: i64 = db
            .lock()
            .unwrap()
            .conn()
            .query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn edit_and_delete_reach_the_peer_after_commit_only() {
        init_logs();
        let (_dir, db) = open_shared_db(&["ada", "zoe"]);
        let ada_session = service_for(&db, "ada")
            .open(&UserId("zoe".into()))
            .await
            .unwrap();
        let zoe_session = service_for(&db, "zoe")
            .open(&UserId("ada".into()))
            .await
            .unwrap();

        let mut zoe_rx = zoe_session.timeline();
        let id = ada_session.send_message("salut").await.unwrap();
        next_items(&mut zoe_rx).await;

        // A blank edit is rejected before any store call.
        assert!(matches!(
            ada_session.edit_message(&id, "   ").await,
            Err(EngineError::InvalidArgument(_))
        ));

        ada_session.edit_message(&id, "salut !").await.unwrap();
        let items = next_items(&mut zoe_rx).await;
        let messages = messages_of(&items);
        assert!(messages[0].edited);
        assert_eq!(messages[0].text.as_deref(), Some("salut !"));

        ada_session.delete_message(&id).await.unwrap();
        let items = next_items(&mut zoe_rx).await;
        assert!(messages_of(&items).is_empty());
    }

    #[tokio::test]
    async fn closed_session_stops_observing() {
        init_logs();
        let (_dir, db) = open_shared_db(&["ada", "zoe"]);
        let ada_session = service_for(&db, "ada")
            .open(&UserId("zoe".into()))
            .await
            .unwrap();
        let mut zoe_session = service_for(&db, "zoe")
            .open(&UserId("ada".into()))
            .await
            .unwrap();

        let mut zoe_rx = zoe_session.timeline();
        zoe_session.close();
        // close() is idempotent.
        zoe_session.close();

        ada_session.send_message("dans le vide").await.unwrap();
        let unchanged =
            tokio::time::timeout(Duration::from_millis(100), zoe_rx.changed()).await;
        assert!(unchanged.is_err(), "closed session must not receive updates");
    }

    #[tokio::test]
    async fn challenge_completion_moves_affinity_once() {
        init_logs();
        let (_dir, db) = open_shared_db(&["ada", "zoe"]);
        let session = service_for(&db, "ada")
            .open(&UserId("zoe".into()))
            .await
            .unwrap();

        let challenge = ChallengeId("read-same-book".into());
        assert!(session.complete_challenge(&challenge, 60).await.unwrap());
        assert!(!session.complete_challenge(&challenge, 60).await.unwrap());

        let affinity = session.affinity().unwrap();
        assert_eq!(affinity.score, 60);
        assert_eq!(affinity.tier, crate::affinity::AffinityTier::Bookworms);
    }

    #[tokio::test]
    async fn open_requires_identity_and_a_real_peer() {
        init_logs();
        let (_dir, db) = open_shared_db(&["ada"]);

        let anonymous = ChatService::new(
            db.clone(),
            Arc::new(LocalAuth::signed_out()),
            Arc::new(MemoryObjectStore::new()),
        );
        assert!(matches!(
            anonymous.open(&UserId("ada".into())).await,
            Err(EngineError::NotAuthenticated)
        ));

        let ada = service_for(&db, "ada");
        assert!(matches!(
            ada.open(&UserId("ada".into())).await,
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            ada.open(&UserId("ghost".into())).await,
            Err(EngineError::NotFound(_))
        ));
    }
}
