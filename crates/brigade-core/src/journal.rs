//! Append-only transition log.
//!
//! Every enter, exit, manual close, submit, approve, and reject is
//! recorded as a [`ReviewTransition`]. Entries are kept sorted by
//! `(timestamp, id)` and deduplicated by id, so merging the same records
//! from persistence and from another session is idempotent.

use std::collections::BTreeSet;

use brigade_types::{ReviewAction, ReviewTransition, TransitionId, UserId};
use chrono::NaiveDate;

/// Ordered, deduplicated transition history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionLog {
    entries: Vec<ReviewTransition>,
    ids: BTreeSet<TransitionId>,
}

impl TransitionLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Returns `false` if its id is already present.
    pub fn append(&mut self, entry: ReviewTransition) -> bool {
        if !self.ids.insert(entry.id) {
            return false;
        }
        let position = self
            .entries
            .partition_point(|e| (e.timestamp, e.id) <= (entry.timestamp, entry.id));
        self.entries.insert(position, entry);
        true
    }

    /// Whether an entry with this id has been recorded.
    pub fn contains(&self, id: &TransitionId) -> bool {
        self.ids.contains(id)
    }

    /// All entries in `(timestamp, id)` order.
    pub fn entries(&self) -> &[ReviewTransition] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries recorded on a calendar date.
    pub fn for_date(&self, date: NaiveDate) -> impl Iterator<Item = &ReviewTransition> {
        self.entries.iter().filter(move |e| e.calendar_date == date)
    }

    /// Entries about one target.
    pub fn for_target<'a>(
        &'a self,
        target: &'a str,
    ) -> impl Iterator<Item = &'a ReviewTransition> + 'a {
        self.entries.iter().filter(move |e| e.target_id == target)
    }

    /// Whether `user` performed `action` on `date`.
    pub fn has_acted(&self, user: &UserId, action: ReviewAction, date: NaiveDate) -> bool {
        self.for_date(date)
            .any(|e| &e.user_id == user && e.action == action)
    }

    /// Whether `user` performed `action` on `target` on `date`.
    pub fn has_acted_on(
        &self,
        user: &UserId,
        action: ReviewAction,
        target: &str,
        date: NaiveDate,
    ) -> bool {
        self.for_date(date)
            .any(|e| &e.user_id == user && e.action == action && e.target_id == target)
    }

    /// Whether anyone performed `action` on `target` (any date).
    pub fn any_on(&self, action: ReviewAction, target: &str) -> bool {
        self.for_target(target).any(|e| e.action == action)
    }

    /// The submit entry that produced submission number `submission`.
    pub fn submit_entry(&self, target: &str, submission: u32) -> Option<&ReviewTransition> {
        self.entries.iter().rev().find(|e| {
            e.target_id == target && e.action == ReviewAction::Submit && e.submission == submission
        })
    }
}
