/// Application name
pub const APP_NAME: &str = "Bouquine";

/// Number of messages fetched per history page (initial load and backfill)
pub const HISTORY_PAGE_SIZE: u32 = 20;

/// Typing indicator inactivity window in milliseconds.  When no keystroke
/// arrives for this long the typing flag is published back to false.
pub const TYPING_TIMEOUT_MS: u64 = 4_000;

/// Maximum accepted message text length in characters
pub const MAX_MESSAGE_LEN: usize = 4_096;

/// Chunk size for fan-out user lookups (follower / following hydration)
pub const USER_LOOKUP_CHUNK: usize = 10;

/// Capacity of the store change-bus broadcast channel.  A receiver that
/// falls further behind than this is reported as lagged.
pub const CHANGE_BUS_CAPACITY: usize = 256;
