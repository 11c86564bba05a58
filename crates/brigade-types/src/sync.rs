//! Sync bus message types.
//!
//! A [`SyncMessage`] is an invalidation hint: receivers re-fetch
//! authoritative state instead of applying the payload blindly. Each
//! message also names the durable shadow slot it is mirrored into so a
//! session that opens later can catch up by reading slots.
//!
//! # Shadow key patterns
//!
//! | Pattern | Written by |
//! |---------|------------|
//! | `task:{def_id}:{date}` | task messages (last value wins) |
//! | `schedule:{date}:{seq}` | period and day-roll messages (one slot per event) |
//! | `clock:offset` | clock offset changes |

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::SyncMessageType;
use crate::ids::{MessageId, PeriodId, SessionId, UserId};
use crate::structs::TaskKey;

/// Shadow slot holding the shared simulated clock offset.
pub const CLOCK_OFFSET_KEY: &str = "clock:offset";

/// Prefix of the schedule journal slots for one calendar date.
pub fn schedule_prefix(date: NaiveDate) -> String {
    format!("schedule:{date}:")
}

/// Calendar date a shadow slot belongs to, or `None` for undated slots
/// such as [`CLOCK_OFFSET_KEY`].
pub fn shadow_key_date(key: &str) -> Option<NaiveDate> {
    key.strip_prefix("schedule:")
        .and_then(|rest| rest.split(':').next())
        .or_else(|| key.strip_prefix("task:").and_then(|rest| rest.rsplit(':').next()))?
        .parse()
        .ok()
}

/// Payload of a sync message. The serde tag doubles as the message type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum SyncPayload {
    /// Evidence submitted; approvers should refresh their queue.
    TaskSubmitted {
        /// The task instance.
        key: TaskKey,
        /// Submission number after the submit.
        submission: u32,
    },
    /// Submission approved.
    TaskApproved {
        /// The task instance.
        key: TaskKey,
    },
    /// Submission rejected; the submitter's session shows the reason.
    TaskRejected {
        /// The task instance.
        key: TaskKey,
        /// Reason given by the approver.
        reason: String,
        /// The user who made the rejected submission, if known.
        submitter: Option<UserId>,
    },
    /// Task completed without review.
    TaskCompleted {
        /// The task instance.
        key: TaskKey,
    },
    /// Task started.
    TaskStarted {
        /// The task instance.
        key: TaskKey,
    },
    /// Task flagged overdue.
    TaskOverdue {
        /// The task instance.
        key: TaskKey,
    },
    /// Period entered.
    PeriodEntered {
        /// The period.
        period: PeriodId,
        /// Boundary instant.
        at: NaiveDateTime,
        /// Position in the day's schedule journal.
        seq: u32,
    },
    /// Period exited.
    PeriodExited {
        /// The period.
        period: PeriodId,
        /// Boundary instant.
        at: NaiveDateTime,
        /// Position in the day's schedule journal.
        seq: u32,
    },
    /// Calendar date changed.
    DayRolled {
        /// Previous date.
        from: NaiveDate,
        /// New date.
        to: NaiveDate,
        /// Position in the new date's schedule journal.
        seq: u32,
    },
    /// Period closed early by an approver.
    PeriodClosed {
        /// The period.
        period: PeriodId,
        /// When it was closed.
        at: NaiveDateTime,
        /// Position in the day's schedule journal.
        seq: u32,
    },
    /// Shared simulated clock offset changed (`None` = real time).
    ClockOffset {
        /// Offset in whole seconds.
        offset_secs: Option<i64>,
    },
}

impl SyncPayload {
    /// The message type used for subscription filtering.
    pub const fn kind(&self) -> SyncMessageType {
        match self {
            Self::TaskSubmitted { .. } => SyncMessageType::TaskSubmitted,
            Self::TaskApproved { .. } => SyncMessageType::TaskApproved,
            Self::TaskRejected { .. } => SyncMessageType::TaskRejected,
            Self::TaskCompleted { .. } => SyncMessageType::TaskCompleted,
            Self::TaskStarted { .. } => SyncMessageType::TaskStarted,
            Self::TaskOverdue { .. } => SyncMessageType::TaskOverdue,
            Self::PeriodEntered { .. } => SyncMessageType::PeriodEntered,
            Self::PeriodExited { .. } => SyncMessageType::PeriodExited,
            Self::DayRolled { .. } => SyncMessageType::DayRolled,
            Self::PeriodClosed { .. } => SyncMessageType::PeriodClosed,
            Self::ClockOffset { .. } => SyncMessageType::ClockOffset,
        }
    }

    /// The task instance the payload refers to, if any.
    pub const fn task_key(&self) -> Option<&TaskKey> {
        match self {
            Self::TaskSubmitted { key, .. }
            | Self::TaskApproved { key }
            | Self::TaskRejected { key, .. }
            | Self::TaskCompleted { key }
            | Self::TaskStarted { key }
            | Self::TaskOverdue { key } => Some(key),
            _ => None,
        }
    }

    /// The durable shadow slot this payload is mirrored into.
    pub fn shadow_key(&self) -> String {
        match self {
            Self::TaskSubmitted { key, .. }
            | Self::TaskApproved { key }
            | Self::TaskRejected { key, .. }
            | Self::TaskCompleted { key }
            | Self::TaskStarted { key }
            | Self::TaskOverdue { key } => format!("task:{}:{}", key.def_id, key.date),
            Self::PeriodEntered { at, seq, .. }
            | Self::PeriodExited { at, seq, .. }
            | Self::PeriodClosed { at, seq, .. } => {
                format!("{}{seq:08}", schedule_prefix(at.date()))
            }
            Self::DayRolled { to, seq, .. } => format!("{}{seq:08}", schedule_prefix(*to)),
            Self::ClockOffset { .. } => CLOCK_OFFSET_KEY.to_owned(),
        }
    }
}

/// A change notification fanned out across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SyncMessage {
    /// Unique message id.
    pub id: MessageId,
    /// The session that originated the message; it does not receive it back.
    pub sender: SessionId,
    /// Business time at which the message was created.
    pub timestamp: NaiveDateTime,
    /// What changed.
    pub payload: SyncPayload,
}

impl SyncMessage {
    /// Build a new message from a sender.
    pub fn new(sender: SessionId, timestamp: NaiveDateTime, payload: SyncPayload) -> Self {
        Self {
            id: MessageId::new(),
            sender,
            timestamp,
            payload,
        }
    }

    /// Shortcut for `self.payload.kind()`.
    pub const fn kind(&self) -> SyncMessageType {
        self.payload.kind()
    }

    /// Shortcut for `self.payload.shadow_key()`.
    pub fn shadow_key(&self) -> String {
        self.payload.shadow_key()
    }
}
