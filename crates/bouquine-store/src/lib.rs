//! # bouquine-store
//!
//! Local document store for the Bouquine application, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every domain
//! model.  Every operation with a cross-document invariant (follow
//! counters, like counters, books-read ledger, conversation creation,
//! challenge scoring, single-slot reactions) is implemented as a single
//! SQLite transaction: the membership check and the counter delta commit
//! together or not at all, which is what keeps denormalized counters equal
//! to the cardinality of the sets that drive them under concurrent
//! callers.
//!
//! Committed mutations are echoed on a broadcast [`ChangeBus`]
//! so that live subscribers (the engine's timeline tail, toggle-state
//! streams) observe exactly the writes that actually happened — events are
//! published strictly after commit, never from inside an open transaction.

pub mod challenges;
pub mod changes;
pub mod conversations;
pub mod database;
pub mod likes;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod readings;
pub mod social;
pub mod users;

mod error;

pub use changes::{ChangeBus, ChangeKind, MessageChange, StoreEvent};
pub use database::Database;
pub use error::StoreError;
pub use models::*;
