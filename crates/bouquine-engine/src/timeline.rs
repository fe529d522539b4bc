//! In-memory message timeline: pagination cursor, live-tail merge and the
//! rendered display sequence.
//!
//! The timeline is the single serialization point between two independent
//! producers — older-history backfill and the live change tail.  Both only
//! ever add to the buffer; every merge deduplicates by id and finishes
//! with a stable sort on timestamp, so the displayed order is
//! non-decreasing by timestamp no matter in which order pages and live
//! events arrive, and no id can appear twice.
//!
//! All methods are synchronous and never block; the async plumbing lives
//! in [`crate::chat`].

use std::collections::HashSet;

use bouquine_shared::MessageId;
use bouquine_store::messages::PageCursor;
use bouquine_store::{ChangeKind, Message, MessageChange};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;

/// One entry of the rendered display sequence.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub enum TimelineItem {
    /// Synthetic separator inserted before the first message of each
    /// calendar day.
    DateSeparator { date: NaiveDate },
    Message(Message),
}

/// Merged view of one conversation's messages.
#[derive(Debug)]
pub struct Timeline {
    /// Ascending by timestamp; ties keep arrival order (stable sort).
    buffer: Vec<Message>,
    ids: HashSet<MessageId>,
    /// Position of the oldest loaded message; backfill fetches strictly
    /// older than this.
    cursor: Option<PageCursor>,
    has_more_older: bool,
    /// Set once at initial-load completion; live inserts at or before the
    /// boundary are history and are ignored (backfill owns them).
    boundary: Option<DateTime<Utc>>,
    page_size: u32,
}

impl Timeline {
    pub fn new(page_size: u32) -> Self {
        Self {
            buffer: Vec::new(),
            ids: HashSet::new(),
            cursor: None,
            has_more_older: false,
            boundary: None,
            page_size,
        }
    }

    /// Ingest the initial page, given newest-first as the store returns
    /// it.  Records the pagination cursor (oldest fetched) and the live
    /// boundary (newest fetched).  A full page means more history may
    /// exist.
    pub fn ingest_initial(&mut self, mut page_desc: Vec<Message>) {
        self.has_more_older = page_desc.len() as u32 == self.page_size;
        page_desc.reverse();

        self.cursor = page_desc.first().map(|m| PageCursor {
            timestamp: m.timestamp,
            id: m.id,
        });
        self.boundary = page_desc.last().map(|m| m.timestamp);

        self.ids = page_desc.iter().map(|m| m.id).collect();
        self.buffer = page_desc;
    }

    /// Prepend one backfilled page (newest-first).  Advances the cursor to
    /// the new oldest message; a short page pins `has_more_older` to
    /// false.  Returns how many messages were actually new.
    pub fn prepend_older(&mut self, page_desc: Vec<Message>) -> usize {
        self.has_more_older = page_desc.len() as u32 == self.page_size;

        if let Some(oldest) = page_desc.last() {
            self.cursor = Some(PageCursor {
                timestamp: oldest.timestamp,
                id: oldest.id,
            });
        }

        let mut added = 0;
        for message in page_desc {
            if self.ids.insert(message.id) {
                self.buffer.push(message);
                added += 1;
            }
        }
        if added > 0 {
            self.resort();
        }
        added
    }

    /// Merge one live change into the buffer.
    ///
    /// - `Added`: union by id.  An id already present is treated as a
    ///   refresh; an unseen insert at or before the boundary belongs to
    ///   un-backfilled history and is dropped, otherwise it would punch a
    ///   gap into the pagination window.
    /// - `Modified`: replace in place when present, ignore otherwise.
    /// - `Removed`: drop the id.
    ///
    /// Returns whether the buffer changed.
    pub fn apply(&mut self, change: &MessageChange) -> bool {
        let message = &change.message;
        match change.kind {
            ChangeKind::Added => {
                if self.ids.contains(&message.id) {
                    self.replace(message.clone())
                } else if self.past_boundary(message.timestamp) {
                    self.ids.insert(message.id);
                    self.buffer.push(message.clone());
                    self.resort();
                    true
                } else {
                    false
                }
            }
            ChangeKind::Modified => self.replace(message.clone()),
            ChangeKind::Removed => {
                if self.ids.remove(&message.id) {
                    self.buffer.retain(|m| m.id != message.id);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Post-process the merged buffer into the display sequence, inserting
    /// a date separator before the first message of each calendar day.
    /// Days are compared by (year, day-of-year), not by timestamp
    /// subtraction.
    pub fn render(&self) -> Vec<TimelineItem> {
        let mut items = Vec::with_capacity(self.buffer.len() + 4);
        let mut last_day: Option<(i32, u32)> = None;

        for message in &self.buffer {
            let day = (message.timestamp.year(), message.timestamp.ordinal());
            if last_day != Some(day) {
                items.push(TimelineItem::DateSeparator {
                    date: message.timestamp.date_naive(),
                });
                last_day = Some(day);
            }
            items.push(TimelineItem::Message(message.clone()));
        }
        items
    }

    pub fn messages(&self) -> &[Message] {
        &self.buffer
    }

    pub fn has_more_older(&self) -> bool {
        self.has_more_older
    }

    /// Backfill cursor: fetch strictly older than this position.
    pub fn cursor(&self) -> Option<PageCursor> {
        self.cursor
    }

    fn past_boundary(&self, ts: DateTime<Utc>) -> bool {
        match self.boundary {
            Some(boundary) => ts > boundary,
            // Empty conversation at initial load: everything is new.
            None => true,
        }
    }

    fn replace(&mut self, message: Message) -> bool {
        match self.buffer.iter_mut().find(|m| m.id == message.id) {
            Some(slot) => {
                *slot = message;
                true
            }
            None => false,
        }
    }

    fn resort(&mut self) {
        self.buffer.sort_by_key(|m| m.timestamp);
    }
}
