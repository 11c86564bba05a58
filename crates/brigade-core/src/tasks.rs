//! Task instance state machine.
//!
//! A [`TaskBook`] owns every [`TaskInstance`] the engine has activated plus
//! the [`TransitionLog`]. Instances move through
//! `pending -> in_progress -> completed | overdue`. Tasks that require
//! review also carry a review sub-state:
//!
//! ```text
//! not_submitted --submit--> in_review --approve--> approved
//!                              |  ^
//!                        reject|  |submit (count + 1)
//!                              v  |
//!                            rejected
//! ```
//!
//! Every review mutation is appended to the log, which is what
//! [`TaskBook::replay`] uses to rebuild review state in an independent
//! session.

use std::collections::{BTreeMap, BTreeSet};

use brigade_types::{
    EvidenceRef, RejectionRecord, ReviewAction, ReviewStatus, ReviewTransition, TaskDefId,
    TaskDefinition, TaskInstance, TaskKey, TaskStatus, UserId,
};
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use tracing::debug;

use crate::journal::TransitionLog;

/// Errors raised by task transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// No instance exists for this key.
    #[error("no task instance {0}")]
    UnknownTask(TaskKey),

    /// The definition id is not in the catalog.
    #[error("unknown task definition {0}")]
    UnknownDefinition(TaskDefId),

    /// The action is not allowed from the current state.
    #[error("cannot {action} task {key} while {status:?} / {review:?}")]
    InvalidTransition {
        /// The task.
        key: TaskKey,
        /// The attempted action.
        action: &'static str,
        /// Lifecycle status at the time.
        status: TaskStatus,
        /// Review status at the time.
        review: Option<ReviewStatus>,
    },

    /// A rejection was attempted without a reason.
    #[error("a rejection requires a non-empty reason")]
    EmptyReason,
}

/// One applied mutation: the new instance state and its log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// The instance after the mutation.
    pub instance: TaskInstance,
    /// The appended log entry, for review actions.
    pub transition: Option<ReviewTransition>,
}

/// Result of a submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new submission was recorded.
    Submitted(Change),
    /// Identical to the submission under review; nothing changed.
    Coalesced(TaskInstance),
}

/// Whether an instance has missed its window.
///
/// Only pending or in-progress work that is not waiting on (or past) a
/// review counts.
pub fn is_overdue(instance: &TaskInstance, window_end: NaiveDateTime, now: NaiveDateTime) -> bool {
    matches!(instance.status, TaskStatus::Pending | TaskStatus::InProgress)
        && !matches!(
            instance.review_status,
            Some(ReviewStatus::InReview | ReviewStatus::Approved)
        )
        && now > window_end
}

fn invalid(instance: &TaskInstance, action: &'static str) -> TaskError {
    TaskError::InvalidTransition {
        key: instance.key.clone(),
        action,
        status: instance.status,
        review: instance.review_status,
    }
}

const fn is_review_action(action: ReviewAction) -> bool {
    matches!(
        action,
        ReviewAction::Submit | ReviewAction::Approve | ReviewAction::Reject
    )
}

/// The task a submit, approve, or reject entry belongs to.
fn review_target(entry: &ReviewTransition) -> Option<TaskKey> {
    if is_review_action(entry.action) {
        TaskKey::from_target_id(&entry.target_id)
    } else {
        None
    }
}

/// Task instances plus the transition log.
#[derive(Debug, Clone)]
pub struct TaskBook {
    instances: BTreeMap<TaskKey, TaskInstance>,
    log: TransitionLog,
    duplicate_window: TimeDelta,
}

impl TaskBook {
    /// Create an empty book.
    pub fn new(duplicate_window_secs: u32) -> Self {
        Self {
            instances: BTreeMap::new(),
            log: TransitionLog::new(),
            duplicate_window: TimeDelta::try_seconds(i64::from(duplicate_window_secs))
                .unwrap_or_default(),
        }
    }

    /// Look up an instance.
    pub fn get(&self, key: &TaskKey) -> Option<&TaskInstance> {
        self.instances.get(key)
    }

    /// Every instance, ordered by key.
    pub fn instances(&self) -> impl Iterator<Item = &TaskInstance> {
        self.instances.values()
    }

    /// Instances for one calendar date.
    pub fn for_date(&self, date: NaiveDate) -> impl Iterator<Item = &TaskInstance> {
        self.instances.values().filter(move |i| i.key.date == date)
    }

    /// The transition log.
    pub const fn log(&self) -> &TransitionLog {
        &self.log
    }

    /// Every evidence reference still held by an instance.
    pub fn live_evidence_refs(&self) -> BTreeSet<EvidenceRef> {
        self.instances
            .values()
            .flat_map(|i| i.evidence_refs.iter().cloned())
            .collect()
    }

    /// Create the instance for `(def, date)` if it does not exist yet.
    ///
    /// Returns the instance and whether it was created.
    pub fn activate(
        &mut self,
        def: &TaskDefinition,
        date: NaiveDate,
        now: NaiveDateTime,
    ) -> (TaskInstance, bool) {
        let key = TaskKey::new(def.id.clone(), date);
        if let Some(existing) = self.instances.get(&key) {
            return (existing.clone(), false);
        }
        let instance = TaskInstance::activated(key.clone(), def.requires_review, now);
        self.instances.insert(key, instance.clone());
        debug!(task = %instance.key, "Task activated");
        (instance, true)
    }

    /// Record a non-task transition (period enter/exit/close).
    pub fn record(&mut self, entry: ReviewTransition) -> bool {
        self.log.append(entry)
    }

    fn instance_mut(&mut self, key: &TaskKey) -> Result<&mut TaskInstance, TaskError> {
        self.instances
            .get_mut(key)
            .ok_or_else(|| TaskError::UnknownTask(key.clone()))
    }

    /// Flag an instance overdue if its window has passed.
    ///
    /// Returns `None` when the instance is missing or not eligible.
    pub fn mark_overdue(
        &mut self,
        key: &TaskKey,
        window_end: NaiveDateTime,
        now: NaiveDateTime,
    ) -> Option<TaskInstance> {
        let instance = self.instances.get_mut(key)?;
        if !is_overdue(instance, window_end, now) {
            return None;
        }
        instance.status = TaskStatus::Overdue;
        instance.touch(now);
        Some(instance.clone())
    }

    /// Begin work on a task.
    ///
    /// # Errors
    ///
    /// [`TaskError::InvalidTransition`] unless the task is pending or
    /// overdue and not waiting on a review.
    pub fn start(&mut self, key: &TaskKey, now: NaiveDateTime) -> Result<Change, TaskError> {
        let instance = self.instance_mut(key)?;
        let startable = matches!(instance.status, TaskStatus::Pending | TaskStatus::Overdue)
            && !matches!(
                instance.review_status,
                Some(ReviewStatus::InReview | ReviewStatus::Approved)
            );
        if !startable {
            return Err(invalid(instance, "start"));
        }
        instance.status = TaskStatus::InProgress;
        instance.started_at.get_or_insert(now);
        instance.touch(now);
        Ok(Change {
            instance: instance.clone(),
            transition: None,
        })
    }

    /// Complete a task that does not require review.
    ///
    /// # Errors
    ///
    /// [`TaskError::InvalidTransition`] for review tasks or tasks already
    /// completed.
    pub fn complete(
        &mut self,
        key: &TaskKey,
        evidence: Vec<EvidenceRef>,
        now: NaiveDateTime,
    ) -> Result<Change, TaskError> {
        let instance = self.instance_mut(key)?;
        if instance.review_status.is_some() || !instance.status.is_open() {
            return Err(invalid(instance, "complete"));
        }
        instance.status = TaskStatus::Completed;
        instance.started_at.get_or_insert(now);
        instance.completed_at = Some(now);
        instance.evidence_refs = evidence;
        instance.touch(now);
        Ok(Change {
            instance: instance.clone(),
            transition: None,
        })
    }

    /// Submit evidence for review.
    ///
    /// A submit identical to the one under review, inside the duplicate
    /// window, is coalesced.
    ///
    /// # Errors
    ///
    /// [`TaskError::InvalidTransition`] for tasks without review, tasks
    /// already approved, or a differing submit while in review.
    pub fn submit(
        &mut self,
        key: &TaskKey,
        evidence: Vec<EvidenceRef>,
        by: &UserId,
        now: NaiveDateTime,
    ) -> Result<SubmitOutcome, TaskError> {
        let window = self.duplicate_window;
        let instance = self
            .instances
            .get_mut(key)
            .ok_or_else(|| TaskError::UnknownTask(key.clone()))?;
        let target = key.target_id();

        match instance.review_status {
            Some(ReviewStatus::NotSubmitted | ReviewStatus::Rejected) => {}
            Some(ReviewStatus::InReview) => {
                let duplicate = self
                    .log
                    .submit_entry(&target, instance.submission_count)
                    .is_some_and(|entry| {
                        entry.evidence == evidence
                            && now >= entry.timestamp
                            && now.signed_duration_since(entry.timestamp) <= window
                    });
                if duplicate {
                    debug!(task = %key, "Duplicate submit coalesced");
                    return Ok(SubmitOutcome::Coalesced(instance.clone()));
                }
                return Err(invalid(instance, "submit"));
            }
            Some(ReviewStatus::Approved) | None => return Err(invalid(instance, "submit")),
        }

        instance.submission_count = instance.submission_count.saturating_add(1);
        instance.review_status = Some(ReviewStatus::InReview);
        instance.status = TaskStatus::InProgress;
        instance.started_at.get_or_insert(now);
        instance.submitted_at = Some(now);
        instance.evidence_refs.clone_from(&evidence);
        instance.touch(now);

        let mut entry = ReviewTransition::new(by.clone(), target, ReviewAction::Submit, now);
        entry.submission = instance.submission_count;
        entry.evidence = evidence;
        let snapshot = instance.clone();
        self.log.append(entry.clone());

        Ok(SubmitOutcome::Submitted(Change {
            instance: snapshot,
            transition: Some(entry),
        }))
    }

    /// Approve the submission under review.
    ///
    /// # Errors
    ///
    /// [`TaskError::InvalidTransition`] unless the task is in review.
    pub fn approve(
        &mut self,
        key: &TaskKey,
        by: &UserId,
        now: NaiveDateTime,
    ) -> Result<Change, TaskError> {
        let instance = self.instance_mut(key)?;
        if instance.review_status != Some(ReviewStatus::InReview) {
            return Err(invalid(instance, "approve"));
        }
        instance.review_status = Some(ReviewStatus::Approved);
        instance.status = TaskStatus::Completed;
        instance.completed_at = Some(now);
        instance.touch(now);

        let mut entry =
            ReviewTransition::new(by.clone(), key.target_id(), ReviewAction::Approve, now);
        entry.submission = instance.submission_count;
        let snapshot = instance.clone();
        self.log.append(entry.clone());
        Ok(Change {
            instance: snapshot,
            transition: Some(entry),
        })
    }

    /// Reject the submission under review and re-arm the task.
    ///
    /// # Errors
    ///
    /// [`TaskError::EmptyReason`] for a blank reason;
    /// [`TaskError::InvalidTransition`] unless the task is in review.
    pub fn reject(
        &mut self,
        key: &TaskKey,
        reason: &str,
        by: &UserId,
        now: NaiveDateTime,
    ) -> Result<Change, TaskError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(TaskError::EmptyReason);
        }
        let instance = self.instance_mut(key)?;
        if instance.review_status != Some(ReviewStatus::InReview) {
            return Err(invalid(instance, "reject"));
        }
        instance.review_status = Some(ReviewStatus::Rejected);
        instance.status = TaskStatus::Pending;
        instance.rejected_at = Some(now);
        instance.rejection_reason = Some(reason.to_owned());
        instance.rejections.push(RejectionRecord {
            reason: reason.to_owned(),
            by: by.clone(),
            at: now,
            submission: instance.submission_count,
        });
        instance.touch(now);

        let mut entry =
            ReviewTransition::new(by.clone(), key.target_id(), ReviewAction::Reject, now);
        entry.submission = instance.submission_count;
        entry.reason = Some(reason.to_owned());
        let snapshot = instance.clone();
        self.log.append(entry.clone());
        Ok(Change {
            instance: snapshot,
            transition: Some(entry),
        })
    }

    /// Merge transition records from persistence or another session.
    ///
    /// Records already in the log are skipped. Review state of every
    /// affected task is then rebuilt from its full log history, so the
    /// result does not depend on the order or number of replays.
    ///
    /// Returns how many records were new.
    pub fn replay<I>(&mut self, transitions: I) -> usize
    where
        I: IntoIterator<Item = ReviewTransition>,
    {
        let mut touched = BTreeSet::new();
        let mut added: usize = 0;
        for entry in transitions {
            let target = review_target(&entry);
            if self.log.append(entry) {
                added = added.saturating_add(1);
                touched.extend(target);
            }
        }
        for key in touched {
            self.rebuild_review_state(&key);
        }
        added
    }

    fn rebuild_review_state(&mut self, key: &TaskKey) {
        let target = key.target_id();
        let history: Vec<ReviewTransition> = self
            .log
            .for_target(&target)
            .filter(|e| is_review_action(e.action))
            .cloned()
            .collect();
        let Some(first) = history.first() else {
            return;
        };

        let instance = self
            .instances
            .entry(key.clone())
            .or_insert_with(|| TaskInstance::activated(key.clone(), true, first.timestamp));
        let was_overdue = instance.status == TaskStatus::Overdue;
        instance.review_status = Some(ReviewStatus::NotSubmitted);
        instance.status = if was_overdue {
            TaskStatus::Overdue
        } else {
            TaskStatus::Pending
        };
        instance.submission_count = 0;
        instance.submitted_at = None;
        instance.completed_at = None;
        instance.rejected_at = None;
        instance.rejection_reason = None;
        instance.rejections.clear();
        instance.evidence_refs.clear();

        for entry in &history {
            let at = entry.timestamp;
            match entry.action {
                ReviewAction::Submit => {
                    instance.submission_count = instance.submission_count.max(entry.submission);
                    instance.review_status = Some(ReviewStatus::InReview);
                    instance.status = TaskStatus::InProgress;
                    instance.started_at.get_or_insert(at);
                    instance.submitted_at = Some(at);
                    instance.evidence_refs.clone_from(&entry.evidence);
                }
                ReviewAction::Approve => {
                    instance.review_status = Some(ReviewStatus::Approved);
                    instance.status = TaskStatus::Completed;
                    instance.completed_at = Some(at);
                }
                ReviewAction::Reject => {
                    let reason = entry.reason.clone().unwrap_or_default();
                    instance.review_status = Some(ReviewStatus::Rejected);
                    instance.status = TaskStatus::Pending;
                    instance.rejected_at = Some(at);
                    instance.rejection_reason = Some(reason.clone());
                    instance.rejections.push(RejectionRecord {
                        reason,
                        by: entry.user_id.clone(),
                        at,
                        submission: entry.submission,
                    });
                }
                ReviewAction::Enter | ReviewAction::Exit | ReviewAction::ManualClose => {}
            }
            if at > instance.updated_at {
                instance.updated_at = at;
            }
        }
        instance.revision = instance.revision.saturating_add(1);
    }

    /// Replace all state with records loaded from persistence.
    ///
    /// The instance rows and the log are written separately, so a row may
    /// lag behind its transitions. Review state of every task with review
    /// entries is rebuilt from the log, which wins over the row.
    pub fn restore<I, T>(&mut self, instances: I, transitions: T)
    where
        I: IntoIterator<Item = TaskInstance>,
        T: IntoIterator<Item = ReviewTransition>,
    {
        self.instances = instances
            .into_iter()
            .map(|instance| (instance.key.clone(), instance))
            .collect();
        self.log = TransitionLog::new();
        let mut reviewed = BTreeSet::new();
        for entry in transitions {
            reviewed.extend(review_target(&entry));
            self.log.append(entry);
        }
        for key in reviewed {
            self.rebuild_review_state(&key);
        }
    }
}
