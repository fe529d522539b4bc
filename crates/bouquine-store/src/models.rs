//! Domain model structs persisted in the local SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the presentation layer.  Loosely-typed rows are decoded
//! into these structs at the store boundary; nothing dynamically typed
//! leaks past this crate.

use std::collections::BTreeMap;

use bouquine_shared::{
    BookId, ChallengeId, CommentId, ConversationId, DeliveryStatus, LikeSubject, MessageId,
    ReadingStatus, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A user profile row, including the denormalized counters maintained by
/// the ledger transactions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    /// Number of users this user follows; equals `|follows where follower = id|`.
    pub following_count: i64,
    /// Number of users following this user; equals `|follows where followee = id|`.
    pub followers_count: i64,
    /// Number of completed readings; equals `|completed_readings for id|`.
    pub books_read_count: i64,
    pub online: bool,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A private conversation between exactly two participants.  The id is the
/// two sorted participant ids joined by ':' (see
/// [`ConversationId::for_pair`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub created_at: DateTime<Utc>,
    pub last_message_text: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    /// Timestamp of the very first message ever sent, set once.
    pub first_message_at: Option<DateTime<Utc>>,
    pub message_count: i64,
    /// Non-negative gamified score, incremented by completed challenges.
    pub affinity_score: i64,
}

/// Per-participant state of a conversation.  Display name and avatar are
/// snapshots captured at creation time and not live-synchronized with the
/// profile afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationMember {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub unread_count: i64,
    pub typing: bool,
    /// True while the participant has the conversation in the foreground.
    pub active: bool,
    pub favorite: bool,
    pub pinned: bool,
    pub archived: bool,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Reference to the message a reply points at.  The preview and sender
/// label are copied at reply time; messages are hard-deleted without a
/// tombstone, so a reference may outlive its original.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplyRef {
    pub message_id: MessageId,
    pub preview: String,
    pub sender_name: String,
}

/// A single chat message, with its reaction map joined in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub text: Option<String>,
    pub image_url: Option<String>,
    /// Assigned by the store at insert time, never by the caller.
    pub timestamp: DateTime<Utc>,
    pub edited: bool,
    pub forwarded: bool,
    pub reply_to: Option<ReplyRef>,
    /// At most one entry per user: a new emoji replaces the old one.
    pub reactions: BTreeMap<UserId, String>,
    pub status: DeliveryStatus,
}

// ---------------------------------------------------------------------------
// Social graph
// ---------------------------------------------------------------------------

/// A directed follow edge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FollowEdge {
    pub follower_id: UserId,
    pub followee_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// A like on a reading or a comment.  At most one per (subject key, liker).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Like {
    pub subject: LikeSubject,
    pub target_user_id: UserId,
    pub book_id: BookId,
    pub comment_id: Option<CommentId>,
    pub liker_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// A comment on a book, with its denormalized like counter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub id: CommentId,
    pub book_id: BookId,
    pub author_id: UserId,
    pub text: String,
    /// Equals the number of Like rows targeting this comment.
    pub likes_count: i64,
    pub last_like_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Library
// ---------------------------------------------------------------------------

/// An active library entry.  Mutually exclusive with [`CompletedReading`]
/// for the same (user, book).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reading {
    pub user_id: UserId,
    pub book_id: BookId,
    pub status: ReadingStatus,
    pub started_at: DateTime<Utc>,
}

/// A finished book.  Creation and deletion move `books_read_count` in the
/// same transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletedReading {
    pub user_id: UserId,
    pub book_id: BookId,
    pub completed_at: DateTime<Utc>,
}

/// Client-local reading position.  Not covered by the consistency engine:
/// plain upsert, no counters, no change-bus events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadingProgress {
    pub user_id: UserId,
    pub book_id: BookId,
    pub last_page: i64,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Challenges
// ---------------------------------------------------------------------------

/// A challenge completed inside a conversation.  The set membership is the
/// idempotence guard: re-completing an already-completed challenge awards
/// no further points.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChallengeCompletion {
    pub conversation_id: ConversationId,
    pub challenge_id: ChallengeId,
    pub bonus_points: i64,
    pub completed_at: DateTime<Utc>,
}
