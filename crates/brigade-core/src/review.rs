//! Review workflow: submit, review, approve or reject, resubmit.
//!
//! The [`ReviewWorkflowController`] is the only writer of the
//! [`TaskBook`]. Every call carries an explicit [`SessionContext`]; the
//! controller checks the caller's role, applies the transition, publishes
//! the matching sync message, raises staff alerts, and queues the durable
//! writes in the [`PersistOutbox`].

use std::sync::Arc;

use brigade_sync::SyncBus;
use brigade_types::{
    AlertKind, EvidenceRef, PeriodId, ReviewAction, ReviewTransition, RoleName, SessionId,
    SyncMessage, SyncPayload, TaskDefinition, TaskInstance, TaskKey, UserId, Verdict,
};
use chrono::{NaiveDate, NaiveDateTime};
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::collaborators::{EvidenceMetadata, MediaError, MediaStore, Notifier};
use crate::config::{PersistenceConfig, ReviewConfig};
use crate::outbox::{PendingWrite, PersistOutbox};
use crate::tasks::{Change, SubmitOutcome, TaskBook, TaskError};

/// Who is acting, passed explicitly on every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// The client session.
    pub session_id: SessionId,
    /// The signed-in user.
    pub user_id: UserId,
    /// The user's role.
    pub role: RoleName,
}

impl SessionContext {
    /// Open a context with a fresh session id.
    pub fn new(user_id: impl Into<UserId>, role: impl Into<RoleName>) -> Self {
        Self {
            session_id: SessionId::new(),
            user_id: user_id.into(),
            role: role.into(),
        }
    }
}

/// Errors surfaced to the acting user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReviewError {
    /// The caller's role may not perform the action.
    #[error("{user} ({role}) may not {action}")]
    Forbidden {
        /// The caller.
        user: UserId,
        /// The caller's role.
        role: RoleName,
        /// The attempted action.
        action: &'static str,
    },

    /// The task transition was rejected.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// The period occurrence was already closed manually.
    #[error("period {0} was already closed")]
    AlreadyClosed(PeriodId),

    /// Evidence upload failed; nothing was mutated.
    #[error(transparent)]
    EvidenceUpload(#[from] MediaError),
}

/// Upload evidence before submitting.
///
/// Runs to completion before any mutation, so an abandoned or failed
/// upload leaves task state untouched.
///
/// # Errors
///
/// Returns [`ReviewError::EvidenceUpload`].
pub async fn upload_evidence<M: MediaStore>(
    media: &M,
    bytes: Vec<u8>,
    metadata: EvidenceMetadata,
) -> Result<EvidenceRef, ReviewError> {
    let task = metadata.task.clone();
    media.upload_evidence(bytes, metadata).await.map_err(|e| {
        warn!(%task, "Evidence upload failed: {e}");
        ReviewError::EvidenceUpload(e)
    })
}

/// Coordinates review actions across the task book, bus, and outbox.
pub struct ReviewWorkflowController {
    catalog: Arc<Catalog>,
    config: ReviewConfig,
    book: TaskBook,
    outbox: PersistOutbox,
    bus: Arc<SyncBus>,
    notifier: Arc<dyn Notifier>,
    /// Sender id used for engine-originated messages.
    system_session: SessionId,
    /// Current engine tick, used to schedule outbox writes.
    tick: u64,
}

impl ReviewWorkflowController {
    /// Create a controller with an empty task book.
    pub fn new(
        catalog: Arc<Catalog>,
        config: ReviewConfig,
        persistence: PersistenceConfig,
        bus: Arc<SyncBus>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let book = TaskBook::new(config.duplicate_window_secs);
        Self {
            catalog,
            config,
            book,
            outbox: PersistOutbox::new(persistence),
            bus,
            notifier,
            system_session: SessionId::new(),
            tick: 0,
        }
    }

    /// The task book.
    pub const fn book(&self) -> &TaskBook {
        &self.book
    }

    /// Mutable task book, for replay and restore.
    pub const fn book_mut(&mut self) -> &mut TaskBook {
        &mut self.book
    }

    /// The persistence outbox.
    pub const fn outbox(&self) -> &PersistOutbox {
        &self.outbox
    }

    /// Mutable outbox, for the runner's drain/settle cycle.
    pub const fn outbox_mut(&mut self) -> &mut PersistOutbox {
        &mut self.outbox
    }

    /// The sync bus.
    pub const fn bus(&self) -> &Arc<SyncBus> {
        &self.bus
    }

    /// The catalog.
    pub const fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Sender id of engine-originated messages.
    pub const fn system_session(&self) -> SessionId {
        self.system_session
    }

    /// Advance the tick used for outbox scheduling.
    pub const fn set_tick(&mut self, tick: u64) {
        self.tick = tick;
    }

    // -----------------------------------------------------------------------
    // Authorization
    // -----------------------------------------------------------------------

    /// Whether `role` may decide reviews.
    pub fn approves(&self, role: &RoleName) -> bool {
        self.config.is_approver(role)
    }

    /// Whether the context may decide reviews.
    pub fn is_approver(&self, ctx: &SessionContext) -> bool {
        self.approves(&ctx.role)
    }

    /// Require an approver role.
    ///
    /// # Errors
    ///
    /// Returns [`ReviewError::Forbidden`].
    pub fn authorize_approver(
        &self,
        ctx: &SessionContext,
        action: &'static str,
    ) -> Result<(), ReviewError> {
        if self.is_approver(ctx) {
            Ok(())
        } else {
            Err(forbidden(ctx, action))
        }
    }

    fn authorize_task(
        &self,
        ctx: &SessionContext,
        def: &TaskDefinition,
        action: &'static str,
    ) -> Result<(), ReviewError> {
        if ctx.role == def.role || self.is_approver(ctx) {
            Ok(())
        } else {
            Err(forbidden(ctx, action))
        }
    }

    fn definition(&self, key: &TaskKey) -> Result<TaskDefinition, ReviewError> {
        self.catalog
            .tasks
            .get(&key.def_id)
            .cloned()
            .ok_or_else(|| TaskError::UnknownDefinition(key.def_id.clone()).into())
    }

    // -----------------------------------------------------------------------
    // Side effects
    // -----------------------------------------------------------------------

    fn persist(&mut self, change: &Change) {
        if let Some(transition) = &change.transition {
            self.outbox
                .enqueue(PendingWrite::Transition(transition.clone()), self.tick);
        }
        self.outbox
            .enqueue(PendingWrite::Instance(change.instance.clone()), self.tick);
    }

    fn publish(&self, sender: SessionId, now: NaiveDateTime, payload: SyncPayload) {
        self.bus.publish(&SyncMessage::new(sender, now, payload));
    }

    /// Publish an engine-originated message.
    pub fn publish_system(&self, now: NaiveDateTime, payload: SyncPayload) {
        self.publish(self.system_session, now, payload);
    }

    fn notify(&self, kind: AlertKind, message: &str) {
        if let Err(e) = self.notifier.alert(kind, message) {
            warn!(?kind, "Alert failed: {e}");
        }
    }

    fn ensure_instance(&mut self, def: &TaskDefinition, date: NaiveDate, now: NaiveDateTime) {
        let (instance, created) = self.book.activate(def, date, now);
        if created {
            self.outbox
                .enqueue(PendingWrite::Instance(instance), self.tick);
        }
    }

    // -----------------------------------------------------------------------
    // Review actions
    // -----------------------------------------------------------------------

    /// Submit evidence for review.
    ///
    /// # Errors
    ///
    /// [`ReviewError::Forbidden`] if the role does not own the task;
    /// [`ReviewError::Task`] for invalid transitions.
    pub fn request_review(
        &mut self,
        ctx: &SessionContext,
        key: &TaskKey,
        evidence: Vec<EvidenceRef>,
        now: NaiveDateTime,
    ) -> Result<SubmitOutcome, ReviewError> {
        let def = self.definition(key)?;
        self.authorize_task(ctx, &def, "submit")?;
        self.ensure_instance(&def, key.date, now);

        let outcome = self.book.submit(key, evidence, &ctx.user_id, now)?;
        if let SubmitOutcome::Submitted(change) = &outcome {
            self.persist(change);
            let submission = change.instance.submission_count;
            self.publish(
                ctx.session_id,
                now,
                SyncPayload::TaskSubmitted {
                    key: key.clone(),
                    submission,
                },
            );
            self.notify(
                AlertKind::ReviewRequested,
                &format!(
                    "{} submitted \"{}\" for review (submission {submission})",
                    ctx.user_id, def.display_text
                ),
            );
            info!(task = %key, user = %ctx.user_id, submission, "Review requested");
        }
        Ok(outcome)
    }

    /// Approve or reject the submission under review.
    ///
    /// # Errors
    ///
    /// [`ReviewError::Forbidden`] for non-approvers;
    /// [`ReviewError::Task`] for invalid transitions or a blank reason.
    pub fn decide(
        &mut self,
        ctx: &SessionContext,
        key: &TaskKey,
        verdict: &Verdict,
        now: NaiveDateTime,
    ) -> Result<TaskInstance, ReviewError> {
        self.authorize_approver(ctx, "decide reviews")?;
        let def = self.definition(key)?;

        match verdict {
            Verdict::Approve => {
                let change = self.book.approve(key, &ctx.user_id, now)?;
                self.persist(&change);
                self.publish(
                    ctx.session_id,
                    now,
                    SyncPayload::TaskApproved { key: key.clone() },
                );
                self.notify(
                    AlertKind::Approved,
                    &format!("\"{}\" approved by {}", def.display_text, ctx.user_id),
                );
                info!(task = %key, reviewer = %ctx.user_id, "Review approved");
                Ok(change.instance)
            }
            Verdict::Reject { reason } => {
                let change = self.book.reject(key, reason, &ctx.user_id, now)?;
                self.persist(&change);
                let submitter = self
                    .book
                    .log()
                    .submit_entry(&key.target_id(), change.instance.submission_count)
                    .map(|entry| entry.user_id.clone());
                let reason = change.instance.rejection_reason.clone().unwrap_or_default();
                self.publish(
                    ctx.session_id,
                    now,
                    SyncPayload::TaskRejected {
                        key: key.clone(),
                        reason: reason.clone(),
                        submitter,
                    },
                );
                self.notify(
                    AlertKind::Rejected,
                    &format!("\"{}\" rejected: {reason}", def.display_text),
                );
                info!(task = %key, reviewer = %ctx.user_id, "Review rejected");
                Ok(change.instance)
            }
        }
    }

    /// Begin work on a task.
    ///
    /// # Errors
    ///
    /// [`ReviewError::Forbidden`] or [`ReviewError::Task`].
    pub fn start(
        &mut self,
        ctx: &SessionContext,
        key: &TaskKey,
        now: NaiveDateTime,
    ) -> Result<TaskInstance, ReviewError> {
        let def = self.definition(key)?;
        self.authorize_task(ctx, &def, "start tasks")?;
        self.ensure_instance(&def, key.date, now);
        let change = self.book.start(key, now)?;
        self.persist(&change);
        self.publish(
            ctx.session_id,
            now,
            SyncPayload::TaskStarted { key: key.clone() },
        );
        Ok(change.instance)
    }

    /// Complete a task that does not require review.
    ///
    /// # Errors
    ///
    /// [`ReviewError::Forbidden`] or [`ReviewError::Task`].
    pub fn complete(
        &mut self,
        ctx: &SessionContext,
        key: &TaskKey,
        evidence: Vec<EvidenceRef>,
        now: NaiveDateTime,
    ) -> Result<TaskInstance, ReviewError> {
        let def = self.definition(key)?;
        self.authorize_task(ctx, &def, "complete tasks")?;
        self.ensure_instance(&def, key.date, now);
        let change = self.book.complete(key, evidence, now)?;
        self.persist(&change);
        self.publish(
            ctx.session_id,
            now,
            SyncPayload::TaskCompleted { key: key.clone() },
        );
        info!(task = %key, user = %ctx.user_id, "Task completed");
        Ok(change.instance)
    }

    /// Whether `user` performed `action` on `today`.
    pub fn has_acted_today(&self, user: &UserId, action: ReviewAction, today: NaiveDate) -> bool {
        self.book.log().has_acted(user, action, today)
    }

    /// Whether `user` performed `action` on `target` on `today`.
    pub fn has_acted_today_on(
        &self,
        user: &UserId,
        action: ReviewAction,
        target: &str,
        today: NaiveDate,
    ) -> bool {
        self.book.log().has_acted_on(user, action, target, today)
    }

    // -----------------------------------------------------------------------
    // Engine-driven transitions
    // -----------------------------------------------------------------------

    /// Record a manual close of one period occurrence.
    ///
    /// # Errors
    ///
    /// [`ReviewError::Forbidden`] for non-approvers;
    /// [`ReviewError::AlreadyClosed`] if this occurrence was closed before.
    pub fn record_manual_close(
        &mut self,
        ctx: &SessionContext,
        period: &PeriodId,
        occurrence: NaiveDate,
        now: NaiveDateTime,
    ) -> Result<ReviewTransition, ReviewError> {
        self.authorize_approver(ctx, "close periods")?;
        let target = period_target(period, occurrence);
        if self.book.log().any_on(ReviewAction::ManualClose, &target) {
            return Err(ReviewError::AlreadyClosed(period.clone()));
        }
        let entry = ReviewTransition::new(
            ctx.user_id.clone(),
            target,
            ReviewAction::ManualClose,
            now,
        );
        self.book.record(entry.clone());
        self.outbox
            .enqueue(PendingWrite::Transition(entry.clone()), self.tick);
        info!(%period, user = %ctx.user_id, "Period closed manually");
        Ok(entry)
    }

    /// Log a period enter or exit as the system user.
    ///
    /// Returns `None` if this occurrence was already logged with the same
    /// action (for example after a restart).
    pub fn record_period_transition(
        &mut self,
        action: ReviewAction,
        period: &PeriodId,
        occurrence: NaiveDate,
        at: NaiveDateTime,
    ) -> Option<ReviewTransition> {
        let target = period_target(period, occurrence);
        if self.book.log().any_on(action, &target) {
            return None;
        }
        let entry = ReviewTransition::new(UserId::system(), target, action, at);
        self.book.record(entry.clone());
        self.outbox
            .enqueue(PendingWrite::Transition(entry.clone()), self.tick);
        Some(entry)
    }

    /// Activate every task of `period` for `date`. Returns the newly
    /// created instances.
    pub fn activate_period(
        &mut self,
        period: &PeriodId,
        date: NaiveDate,
        now: NaiveDateTime,
    ) -> Vec<TaskInstance> {
        let catalog = Arc::clone(&self.catalog);
        let mut created = Vec::new();
        for def in catalog.tasks.for_period(period) {
            let (instance, is_new) = self.book.activate(def, date, now);
            if is_new {
                self.outbox
                    .enqueue(PendingWrite::Instance(instance.clone()), self.tick);
                created.push(instance);
            }
        }
        created
    }

    /// Flag every instance whose window has passed. Returns the keys that
    /// became overdue.
    pub fn sweep_overdue(&mut self, now: NaiveDateTime) -> Vec<TaskKey> {
        let catalog = Arc::clone(&self.catalog);
        let candidates: Vec<(TaskKey, NaiveDateTime, String)> = self
            .book
            .instances()
            .filter(|i| i.status.is_open())
            .filter_map(|i| {
                let def = catalog.tasks.get(&i.key.def_id)?;
                let (_, end) = catalog.window(def, i.key.date)?;
                Some((i.key.clone(), end, def.display_text.clone()))
            })
            .collect();

        let mut flagged = Vec::new();
        for (key, end, text) in candidates {
            if let Some(instance) = self.book.mark_overdue(&key, end, now) {
                self.outbox
                    .enqueue(PendingWrite::Instance(instance), self.tick);
                self.publish_system(now, SyncPayload::TaskOverdue { key: key.clone() });
                self.notify(AlertKind::Overdue, &format!("\"{text}\" is overdue"));
                flagged.push(key);
            }
        }
        flagged
    }

    /// Raise the period-started alert.
    pub fn announce_period(&self, period: &PeriodId) {
        let name = self
            .catalog
            .periods
            .get(period)
            .map_or_else(|| period.to_string(), |p| p.display_name.clone());
        self.notify(AlertKind::PeriodStarted, &format!("{name} has started"));
    }
}

impl core::fmt::Debug for ReviewWorkflowController {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReviewWorkflowController")
            .field("book", &self.book)
            .field("outbox", &self.outbox.status())
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}

/// Target id used for period transitions.
pub fn period_target(period: &PeriodId, occurrence: NaiveDate) -> String {
    format!("{period}@{occurrence}")
}

fn forbidden(ctx: &SessionContext, action: &'static str) -> ReviewError {
    ReviewError::Forbidden {
        user: ctx.user_id.clone(),
        role: ctx.role.clone(),
        action,
    }
}
