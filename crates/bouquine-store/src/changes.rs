//! Committed-change notification bus.
//!
//! Every mutating [`Database`](crate::Database) helper collects the events
//! it is about to cause while its transaction is open, then publishes them
//! here only after the commit succeeds.  Subscribers therefore never see a
//! write that was rolled back, and a subscriber that hangs cannot hold a
//! transaction open: the bus is a bounded `tokio::sync::broadcast` channel
//! and publishing never blocks.

use bouquine_shared::constants::CHANGE_BUS_CAPACITY;
use bouquine_shared::{
    BookId, CommentId, ConversationId, LikeSubject, ToggleOutcome, UserId,
};
use tokio::sync::broadcast;

use crate::models::Message;

/// Discriminates what happened to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// A committed change to a single message document.  For `Removed` the
/// carried message is the last row state before deletion.
#[derive(Debug, Clone)]
pub struct MessageChange {
    pub kind: ChangeKind,
    pub message: Message,
}

/// A committed store mutation, as observed by live subscribers.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A message was inserted, edited, reacted to, status-flipped or
    /// deleted.  The conversation id lives on the carried message.
    Message(MessageChange),

    /// Conversation metadata changed: typing flag, active set, unread
    /// counter, flags, affinity score or last-message preview.
    ConversationUpdated { id: ConversationId },

    /// A follow edge was toggled.  Counters on both user rows moved in
    /// the same transaction.
    FollowToggled {
        follower: UserId,
        followee: UserId,
        outcome: ToggleOutcome,
    },

    /// A like was toggled on a reading or a comment.
    LikeToggled {
        subject: LikeSubject,
        target_user: UserId,
        book: BookId,
        comment: Option<CommentId>,
        liker: UserId,
        outcome: ToggleOutcome,
    },

    /// A reading moved into or out of the completed state.
    ReadingCompletionChanged {
        user: UserId,
        book: BookId,
        completed: bool,
    },
}

/// Broadcast fan-out of committed store events.
///
/// Cloning the bus clones the sender half; receivers are created on
/// demand.  A receiver that falls behind by more than the channel
/// capacity observes a `Lagged` error rather than blocking writers.
#[derive(Debug, Clone)]
pub struct ChangeBus {
    tx: broadcast::Sender<StoreEvent>,
}

impl ChangeBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_BUS_CAPACITY);
        Self { tx }
    }

    /// Subscribe to all events committed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    /// Publish a committed event.  With no live receivers the event is
    /// simply dropped; that is not an error.
    pub fn publish(&self, event: StoreEvent) {
        let _ = self.tx.send(event);
    }

    /// Publish a batch of committed events, in order.
    pub fn publish_all(&self, events: Vec<StoreEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}
