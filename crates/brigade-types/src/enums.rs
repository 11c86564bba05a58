//! Enumeration types shared by the engine and client sessions.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Task definitions
// ---------------------------------------------------------------------------

/// The kind of artifact a task asks for as proof of completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum EvidenceKind {
    /// A photo of the finished work.
    Photo,
    /// A free-text or numeric record (temperatures, cash counts).
    Record,
    /// A ticked list of sub-items.
    List,
    /// A short audio recording.
    Audio,
    /// No artifact required.
    None,
}

// ---------------------------------------------------------------------------
// Task instance lifecycle
// ---------------------------------------------------------------------------

/// Completion status of a task instance.
///
/// ```text
/// pending -> in_progress (optional) -> completed
///    \             \
///     +-------------+--> overdue
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum TaskStatus {
    /// Activated for the day, not yet touched.
    Pending,
    /// Started, or submitted and awaiting review.
    InProgress,
    /// Done (approved, or completed without review).
    Completed,
    /// The scheduled window ended before completion.
    Overdue,
}

impl TaskStatus {
    /// Whether the instance still needs work from its owner.
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress | Self::Overdue)
    }
}

/// Review sub-state, present only on tasks whose evidence needs approval.
///
/// ```text
/// not_submitted -> in_review -> approved
///                      ^  \
///                      |   -> rejected
///                      +---------/   (resubmit)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ReviewStatus {
    /// Nothing submitted yet.
    NotSubmitted,
    /// Evidence submitted, waiting for an approver.
    InReview,
    /// Accepted by an approver. Terminal.
    Approved,
    /// Sent back to the submitter with a reason.
    Rejected,
}

// ---------------------------------------------------------------------------
// Transition log
// ---------------------------------------------------------------------------

/// The action recorded by a review transition log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ReviewAction {
    /// A period became active.
    Enter,
    /// A period stopped being active.
    Exit,
    /// An approver closed a period early for the day.
    ManualClose,
    /// Evidence was submitted for review.
    Submit,
    /// An approver accepted a submission.
    Approve,
    /// An approver rejected a submission.
    Reject,
}

/// The decision an approver makes on a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "verdict", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Verdict {
    /// Accept the submission.
    Approve,
    /// Send the task back with a reason.
    Reject {
        /// Why the submission was not accepted. Must not be blank.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Sync bus
// ---------------------------------------------------------------------------

/// Discriminant of a [`SyncPayload`](crate::SyncPayload), used to filter
/// subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum SyncMessageType {
    /// Evidence submitted for review.
    TaskSubmitted,
    /// Submission approved.
    TaskApproved,
    /// Submission rejected.
    TaskRejected,
    /// Task completed without review.
    TaskCompleted,
    /// Task started.
    TaskStarted,
    /// Task flagged overdue.
    TaskOverdue,
    /// Period entered.
    PeriodEntered,
    /// Period exited.
    PeriodExited,
    /// Calendar date changed.
    DayRolled,
    /// Period closed early by an approver.
    PeriodClosed,
    /// Simulated clock offset changed.
    ClockOffset,
}

impl SyncMessageType {
    /// Every message type, in declaration order.
    pub const ALL: [Self; 11] = [
        Self::TaskSubmitted,
        Self::TaskApproved,
        Self::TaskRejected,
        Self::TaskCompleted,
        Self::TaskStarted,
        Self::TaskOverdue,
        Self::PeriodEntered,
        Self::PeriodExited,
        Self::DayRolled,
        Self::PeriodClosed,
        Self::ClockOffset,
    ];
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// The kind of alert raised through the notification collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum AlertKind {
    /// A period started.
    PeriodStarted,
    /// A submission is waiting for review.
    ReviewRequested,
    /// A submission was approved.
    Approved,
    /// A submission was rejected.
    Rejected,
    /// A task went overdue.
    Overdue,
}
