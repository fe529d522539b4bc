use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IdError;

// User identity = opaque id handed out by the auth provider.
// Ids must not contain ':' which is reserved as the conversation-id glue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub String);

impl UserId {
    /// Validate and wrap a raw id string.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(IdError::Empty);
        }
        if trimmed.contains(':') {
            return Err(IdError::ReservedSeparator);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Conversation id: the two sorted participant ids joined by ':'.
///
/// Sorting makes the id identical no matter which participant initiates,
/// so conversation lookup between any two users is idempotent and
/// collision-free.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn for_pair(a: &UserId, b: &UserId) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{}:{}", lo.0, hi.0))
    }

    /// Recover the two participant ids encoded in the conversation id,
    /// in ascending order.
    pub fn participants(&self) -> Result<(UserId, UserId), IdError> {
        let mut parts = self.0.splitn(2, ':');
        match (parts.next(), parts.next()) {
            (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => {
                Ok((UserId(a.to_string()), UserId(b.to_string())))
            }
            _ => Err(IdError::MalformedConversation(self.0.clone())),
        }
    }

    /// The participant that is not `me`, if `me` is a participant at all.
    pub fn peer_of(&self, me: &UserId) -> Result<UserId, IdError> {
        let (a, b) = self.participants()?;
        if &a == me {
            Ok(b)
        } else if &b == me {
            Ok(a)
        } else {
            Err(IdError::MalformedConversation(self.0.clone()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BookId(pub String);

impl BookId {
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(IdError::Empty);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChallengeId(pub String);

impl ChallengeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChallengeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CommentId(pub Uuid);

impl CommentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CommentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CommentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery status of a private message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sent,
    Read,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Read => "read",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

/// Status of an active library entry.  A finished book is not a status:
/// finishing removes the active entry and creates a completed-reading
/// record instead.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReadingStatus {
    Reading,
    Paused,
    Abandoned,
}

impl ReadingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reading => "reading",
            Self::Paused => "paused",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "reading" => Some(Self::Reading),
            "paused" => Some(Self::Paused),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }
}

/// Full library status of a (user, book) pair as seen by callers.
/// `Finished` is not a row status: it means the active entry has been
/// replaced by a completed-reading record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LibraryStatus {
    Active(ReadingStatus),
    Finished,
}

/// What a like is attached to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LikeSubject {
    Reading,
    Comment,
}

impl LikeSubject {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reading => "reading",
            Self::Comment => "comment",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "reading" => Some(Self::Reading),
            "comment" => Some(Self::Comment),
            _ => None,
        }
    }
}

/// Result of a toggle-set operation: exactly one of the two is reported.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToggleOutcome {
    Added,
    Removed,
}

/// Result of the single-slot reaction toggle.  Reacting with the emoji
/// already held removes it; a different emoji replaces it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReactionOutcome {
    Added,
    Replaced,
    Removed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_is_order_independent() {
        let a = UserId("zoe".into());
        let b = UserId("ada".into());
        assert_eq!(
            ConversationId::for_pair(&a, &b),
            ConversationId::for_pair(&b, &a)
        );
        assert_eq!(ConversationId::for_pair(&a, &b).as_str(), "ada:zoe");
    }

    #[test]
    fn conversation_id_round_trips_participants() {
        let a = UserId("ada".into());
        let b = UserId("zoe".into());
        let id = ConversationId::for_pair(&a, &b);
        let (lo, hi) = id.participants().unwrap();
        assert_eq!((lo, hi), (a.clone(), b.clone()));
        assert_eq!(id.peer_of(&a).unwrap(), b);
        assert_eq!(id.peer_of(&b).unwrap(), a);
    }

    #[test]
    fn user_id_rejects_blank_and_separator() {
        assert_eq!(UserId::parse("  "), Err(IdError::Empty));
        assert_eq!(UserId::parse("a:b"), Err(IdError::ReservedSeparator));
        assert_eq!(UserId::parse(" ada "), Ok(UserId("ada".into())));
    }

    #[test]
    fn uuid_backed_ids_serialize_as_plain_strings() {
        let message_id = MessageId::new();
        let json = serde_json::to_string(&message_id).unwrap();
        assert_eq!(json, format!("\"{message_id}\""));
        assert_eq!(serde_json::from_str::<MessageId>(&json).unwrap(), message_id);

        let comment_id = CommentId::new();
        let json = serde_json::to_string(&comment_id).unwrap();
        assert_eq!(serde_json::from_str::<CommentId>(&json).unwrap(), comment_id);
    }
}
