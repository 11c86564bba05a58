//! Core entity structs: periods, task definitions, task instances, and
//! the review transition log.
//!
//! All wall-clock values are business-local [`NaiveDateTime`]s. The
//! business operates from one location, and "today" always means the
//! local calendar date.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{EvidenceKind, ReviewAction, ReviewStatus, TaskStatus};
use crate::ids::{PeriodId, RoleName, TaskDefId, TransitionId, UserId};

// ---------------------------------------------------------------------------
// Catalog entries
// ---------------------------------------------------------------------------

/// A named, time-bounded operational phase of the business day.
///
/// A window whose `end` is earlier than its `start` spans midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Period {
    /// Catalog key.
    pub id: PeriodId,
    /// Human-readable name shown to staff.
    pub display_name: String,
    /// Time of day the period starts (inclusive).
    pub start: NaiveTime,
    /// Time of day the period ends (exclusive).
    pub end: NaiveTime,
    /// Position in the business day; periods are ordered by this value.
    pub order: u32,
}

impl Period {
    /// Whether the window wraps past midnight.
    pub fn spans_midnight(&self) -> bool {
        self.end < self.start
    }
}

/// A checklist item owned by a role and bound to a period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TaskDefinition {
    /// Catalog key.
    pub id: TaskDefId,
    /// Role that owns the task.
    pub role: RoleName,
    /// Period the task belongs to.
    pub period_id: PeriodId,
    /// Minutes after the period start when the task window opens.
    pub offset_start_minutes: u32,
    /// Minutes after the period start when the task window closes.
    pub offset_end_minutes: u32,
    /// Proof the task asks for.
    pub evidence_kind: EvidenceKind,
    /// Text shown on the checklist.
    pub display_text: String,
    /// Whether completion goes through the review workflow.
    #[serde(default)]
    pub requires_review: bool,
}

// ---------------------------------------------------------------------------
// Task instances
// ---------------------------------------------------------------------------

/// Identity of a task instance: one definition on one calendar date.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TaskKey {
    /// The task definition.
    pub def_id: TaskDefId,
    /// The calendar date the instance belongs to.
    pub date: NaiveDate,
}

impl TaskKey {
    /// Build a key for a definition on a date.
    pub const fn new(def_id: TaskDefId, date: NaiveDate) -> Self {
        Self { def_id, date }
    }

    /// The string used as `target_id` on transition log entries.
    pub fn target_id(&self) -> String {
        self.to_string()
    }

    /// Parse a `def_id@YYYY-MM-DD` target id back into a key.
    ///
    /// Period targets share the same shape, so callers check the
    /// definition id against the task catalog.
    pub fn from_target_id(target: &str) -> Option<Self> {
        let (def_id, date) = target.rsplit_once('@')?;
        let date = date.parse::<NaiveDate>().ok()?;
        if def_id.is_empty() {
            return None;
        }
        Some(Self::new(TaskDefId::from(def_id), date))
    }
}

impl core::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.def_id, self.date)
    }
}

/// A reference to an uploaded evidence artifact.
///
/// The engine never holds evidence bytes; it only keeps what the media
/// collaborator returned.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct EvidenceRef {
    /// Kind of artifact.
    pub kind: EvidenceKind,
    /// Location of the uploaded blob (empty for inline records).
    pub url: String,
    /// Inline value for record and list evidence.
    #[serde(default)]
    pub value: Option<String>,
}

/// One rejection in a task instance's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RejectionRecord {
    /// Why the submission was rejected.
    pub reason: String,
    /// The approver who rejected it.
    pub by: UserId,
    /// When it was rejected.
    pub at: NaiveDateTime,
    /// The submission number that was rejected.
    pub submission: u32,
}

/// A single occurrence of a task definition for one calendar date.
///
/// Instances are created lazily on first reference, mutated by
/// completion and review actions, and never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct TaskInstance {
    /// Identity.
    pub key: TaskKey,
    /// Completion status.
    pub status: TaskStatus,
    /// Review sub-state, `None` for tasks without review.
    pub review_status: Option<ReviewStatus>,
    /// Number of accepted (non-coalesced) submissions.
    pub submission_count: u32,
    /// Evidence attached to the latest submission or completion.
    pub evidence_refs: Vec<EvidenceRef>,
    /// When work started.
    pub started_at: Option<NaiveDateTime>,
    /// When the latest submission was made.
    pub submitted_at: Option<NaiveDateTime>,
    /// When the task was completed or approved.
    pub completed_at: Option<NaiveDateTime>,
    /// When the latest rejection happened.
    pub rejected_at: Option<NaiveDateTime>,
    /// Reason given with the latest rejection.
    pub rejection_reason: Option<String>,
    /// Every rejection, oldest first.
    #[serde(default)]
    pub rejections: Vec<RejectionRecord>,
    /// Last mutation time, in business time.
    pub updated_at: NaiveDateTime,
    /// Mutation counter. The persisted copy keeps the highest revision,
    /// since business time moves backwards when the clock offset drops.
    #[serde(default)]
    pub revision: u64,
}

impl TaskInstance {
    /// A freshly activated instance.
    pub const fn activated(key: TaskKey, requires_review: bool, now: NaiveDateTime) -> Self {
        Self {
            key,
            status: TaskStatus::Pending,
            review_status: if requires_review {
                Some(ReviewStatus::NotSubmitted)
            } else {
                None
            },
            submission_count: 0,
            evidence_refs: Vec::new(),
            started_at: None,
            submitted_at: None,
            completed_at: None,
            rejected_at: None,
            rejection_reason: None,
            rejections: Vec::new(),
            updated_at: now,
            revision: 0,
        }
    }

    /// Record a mutation made at `now`.
    pub const fn touch(&mut self, now: NaiveDateTime) {
        self.updated_at = now;
        self.revision = self.revision.saturating_add(1);
    }

    /// Whether the owner can act on the instance right now.
    pub fn is_actionable(&self) -> bool {
        self.status.is_open() && self.review_status != Some(ReviewStatus::InReview)
    }
}

// ---------------------------------------------------------------------------
// Transition log
// ---------------------------------------------------------------------------

/// An append-only record of something that happened to a period or task.
///
/// The log is the source of truth for "has this already happened today"
/// checks and for replaying review state in an independent session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ReviewTransition {
    /// Unique entry id; replay skips ids it has already applied.
    pub id: TransitionId,
    /// Who acted.
    pub user_id: UserId,
    /// What was acted on: a [`TaskKey`] target id or a period id.
    pub target_id: String,
    /// What happened.
    pub action: ReviewAction,
    /// When it happened.
    pub timestamp: NaiveDateTime,
    /// Business calendar date of `timestamp`.
    pub calendar_date: NaiveDate,
    /// Submission count at the time of the action (0 for period actions).
    #[serde(default)]
    pub submission: u32,
    /// Evidence carried by a submit.
    #[serde(default)]
    pub evidence: Vec<EvidenceRef>,
    /// Reason carried by a reject.
    #[serde(default)]
    pub reason: Option<String>,
}

impl ReviewTransition {
    /// Build a log entry with no evidence or reason attached.
    pub fn new(
        user_id: UserId,
        target_id: impl Into<String>,
        action: ReviewAction,
        timestamp: NaiveDateTime,
    ) -> Self {
        Self {
            id: TransitionId::new(),
            user_id,
            target_id: target_id.into(),
            action,
            timestamp,
            calendar_date: timestamp.date(),
            submission: 0,
            evidence: Vec::new(),
            reason: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler output
// ---------------------------------------------------------------------------

/// A period transition observed (or synthesized) by the scheduler.
///
/// `at` is always the boundary instant where the change took effect, not
/// the poll instant that noticed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "event", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ScheduleEvent {
    /// A period became active.
    Entered {
        /// The period.
        period: PeriodId,
        /// Boundary instant.
        at: NaiveDateTime,
    },
    /// A period stopped being active.
    Exited {
        /// The period.
        period: PeriodId,
        /// Boundary instant.
        at: NaiveDateTime,
    },
    /// The calendar date changed.
    DayRolled {
        /// The previous date.
        from: NaiveDate,
        /// The new date.
        to: NaiveDate,
        /// Midnight of `to`.
        at: NaiveDateTime,
    },
}

impl ScheduleEvent {
    /// The boundary instant of the event.
    pub const fn at(&self) -> NaiveDateTime {
        match self {
            Self::Entered { at, .. } | Self::Exited { at, .. } | Self::DayRolled { at, .. } => *at,
        }
    }
}
