//! v001 -- Initial schema creation.
//!
//! Creates the core tables: `users`, `conversations`, `conversation_members`,
//! `messages`, `reactions`, `follows`, `likes`, `comments`, `readings`,
//! `completed_readings`, `reading_progress` and `conversation_challenges`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id              TEXT PRIMARY KEY NOT NULL,  -- opaque auth-provider id
    display_name    TEXT NOT NULL,
    avatar_url      TEXT,
    bio             TEXT,
    following_count INTEGER NOT NULL DEFAULT 0, -- |follows where follower = id|
    followers_count INTEGER NOT NULL DEFAULT 0, -- |follows where followee = id|
    books_read_count INTEGER NOT NULL DEFAULT 0,-- |completed_readings for id|
    online          INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    last_seen_at    TEXT NOT NULL,              -- ISO-8601 / RFC-3339
    created_at      TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Conversations (one row per participant pair, id = "lo:hi")
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id                TEXT PRIMARY KEY NOT NULL,
    created_at        TEXT NOT NULL,
    last_message_text TEXT,
    last_message_at   TEXT,
    first_message_at  TEXT,
    message_count     INTEGER NOT NULL DEFAULT 0,
    affinity_score    INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS conversation_members (
    conversation_id TEXT NOT NULL,
    user_id         TEXT NOT NULL,
    display_name    TEXT NOT NULL,              -- snapshot at creation
    avatar_url      TEXT,                       -- snapshot at creation
    unread_count    INTEGER NOT NULL DEFAULT 0,
    typing          INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    active          INTEGER NOT NULL DEFAULT 0, -- foregrounded
    favorite        INTEGER NOT NULL DEFAULT 0,
    pinned          INTEGER NOT NULL DEFAULT 0,
    archived        INTEGER NOT NULL DEFAULT 0,

    PRIMARY KEY (conversation_id, user_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id                TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    conversation_id   TEXT NOT NULL,
    sender_id         TEXT NOT NULL,
    text              TEXT,
    image_url         TEXT,
    timestamp         TEXT NOT NULL,              -- store-assigned, RFC-3339
    edited            INTEGER NOT NULL DEFAULT 0,
    forwarded         INTEGER NOT NULL DEFAULT 0,
    reply_to_id       TEXT,                       -- no FK: originals may be hard-deleted
    reply_preview     TEXT,
    reply_sender_name TEXT,
    status            TEXT NOT NULL DEFAULT 'sent', -- 'sent' | 'read'

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_id, timestamp DESC, id DESC);

-- At most one reaction per (message, user): the key enforces single-slot.
CREATE TABLE IF NOT EXISTS reactions (
    message_id TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    emoji      TEXT NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Social graph
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS follows (
    follower_id TEXT NOT NULL,
    followee_id TEXT NOT NULL,
    created_at  TEXT NOT NULL,

    PRIMARY KEY (follower_id, followee_id)
);

CREATE INDEX IF NOT EXISTS idx_follows_followee ON follows(followee_id);

-- At most one like per (subject key, liker).  comment_id uses '' for
-- "no comment" so it can participate in the primary key.
CREATE TABLE IF NOT EXISTS likes (
    subject        TEXT NOT NULL,               -- 'reading' | 'comment'
    target_user_id TEXT NOT NULL,
    book_id        TEXT NOT NULL,
    comment_id     TEXT NOT NULL DEFAULT '',
    liker_id       TEXT NOT NULL,
    created_at     TEXT NOT NULL,

    PRIMARY KEY (subject, target_user_id, book_id, comment_id, liker_id)
);

CREATE TABLE IF NOT EXISTS comments (
    id           TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    book_id      TEXT NOT NULL,
    author_id    TEXT NOT NULL,
    text         TEXT NOT NULL,
    likes_count  INTEGER NOT NULL DEFAULT 0,    -- |likes targeting this comment|
    last_like_at TEXT,
    created_at   TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Library
-- ----------------------------------------------------------------
-- Active entry and completed entry are mutually exclusive per (user, book).
CREATE TABLE IF NOT EXISTS readings (
    user_id    TEXT NOT NULL,
    book_id    TEXT NOT NULL,
    status     TEXT NOT NULL,                   -- 'reading' | 'paused' | 'abandoned'
    started_at TEXT NOT NULL,

    PRIMARY KEY (user_id, book_id)
);

CREATE TABLE IF NOT EXISTS completed_readings (
    user_id      TEXT NOT NULL,
    book_id      TEXT NOT NULL,
    completed_at TEXT NOT NULL,

    PRIMARY KEY (user_id, book_id)
);

-- Client-local reading position; not part of the consistency engine.
CREATE TABLE IF NOT EXISTS reading_progress (
    user_id    TEXT NOT NULL,
    book_id    TEXT NOT NULL,
    last_page  INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,

    PRIMARY KEY (user_id, book_id)
);

-- ----------------------------------------------------------------
-- Challenges
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversation_challenges (
    conversation_id TEXT NOT NULL,
    challenge_id    TEXT NOT NULL,
    bonus_points    INTEGER NOT NULL DEFAULT 0,
    completed_at    TEXT NOT NULL,

    PRIMARY KEY (conversation_id, challenge_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
