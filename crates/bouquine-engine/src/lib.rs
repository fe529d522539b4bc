//! # bouquine-engine
//!
//! The asynchronous engine the presentation layer talks to.  It sits on
//! top of [`bouquine_store::Database`] and owns everything with real
//! concurrency in it:
//!
//! - [`chat::ChatService`] / [`chat::ChatSession`] — one conversation's
//!   merged timeline: initial page, older-history backfill, live tail fed
//!   by the store's change bus, and the message commands.
//! - [`presence::TypingPublisher`] — debounced typing indicator and the
//!   active-participant presence writes.
//! - [`social::SocialService`] — follow and like toggles, counter reads,
//!   reactive toggle-state streams and chunked profile hydration.
//! - [`library::LibraryService`] — reading status transitions, completion
//!   and the client-local reading position.
//! - [`affinity`] — pure tier mapping over the conversation score.
//!
//! The store handle is shared behind a `std::sync::Mutex` and never held
//! across an await point; all cross-document atomicity lives in the store's
//! transactions, not in engine-side locking.

pub mod affinity;
pub mod chat;
pub mod library;
pub mod presence;
pub mod providers;
pub mod social;
pub mod timeline;

mod error;

pub use error::{EngineError, Result};

use std::sync::{Arc, Mutex, MutexGuard};

use bouquine_store::Database;

/// Shared handle to the store, as held by every service.
pub type SharedDb = Arc<Mutex<Database>>;

/// Lock the shared store, mapping a poisoned mutex to a transport error
/// instead of panicking in command paths.
pub(crate) fn lock_db(db: &SharedDb) -> Result<MutexGuard<'_, Database>> {
    db.lock()
        .map_err(|e| EngineError::Transport(format!("store lock poisoned: {e}")))
}
