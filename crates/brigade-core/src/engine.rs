//! The engine facade.
//!
//! [`Engine`] ties the clock, the period scheduler, and the review
//! controller together. It is synchronous: the async runner owns the
//! cadence and the I/O, and holds the engine behind a `tokio` mutex.
//!
//! Each [`tick`](Engine::tick):
//!
//! 1. adopts the shared clock offset from the `clock:offset` shadow slot,
//! 2. advances the scheduler and handles every synthesized event in order,
//! 3. flags overdue instances.

use std::collections::BTreeMap;
use std::sync::Arc;

use brigade_sync::SyncBus;
use brigade_types::{
    CLOCK_OFFSET_KEY, EvidenceRef, Period, PeriodId, ReviewAction, ReviewTransition, RoleName,
    ScheduleEvent, SyncPayload, TaskInstance, TaskKey, Verdict, schedule_prefix,
};
use chrono::{Days, NaiveDate, NaiveDateTime, TimeDelta};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, CatalogError, occurrence_date};
use crate::clock::{ClockError, ClockSource};
use crate::collaborators::{Notifier, PersistError, PersistenceAdapter};
use crate::config::EngineConfig;
use crate::outbox::OutboxStatus;
use crate::review::{ReviewError, ReviewWorkflowController, SessionContext};
use crate::scheduler::{PeriodScheduler, ScheduleError};
use crate::session::TaskSource;
use crate::snapshot::EngineSnapshot;
use crate::tasks::SubmitOutcome;

/// Errors surfaced by engine operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The configured catalog is invalid.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// A review action failed.
    #[error(transparent)]
    Review(#[from] ReviewError),

    /// A scheduler operation failed.
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    /// A clock offset was rejected.
    #[error(transparent)]
    Clock(#[from] ClockError),

    /// Loading from persistence failed.
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// Business time the tick observed.
    pub now: NaiveDateTime,
    /// Schedule events handled, in order.
    pub events: Vec<ScheduleEvent>,
    /// Instances that became overdue.
    pub overdue: Vec<TaskKey>,
}

/// Engine state for status endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    /// Business time.
    pub now: NaiveDateTime,
    /// Real time.
    pub real_now: NaiveDateTime,
    /// Active clock offset in seconds.
    pub clock_offset_secs: Option<i64>,
    /// Period active now.
    pub active_period: Option<PeriodId>,
    /// Ticks run so far.
    pub tick: u64,
    /// Writes still queued for persistence.
    pub pending_writes: usize,
    /// Writes that exhausted the retry budget.
    pub unsynced_writes: usize,
    /// Task instances held in memory.
    pub instances: usize,
}

/// Today's and yesterday's durable state, loaded outside the engine lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DayRecords {
    /// Instances of both dates.
    pub instances: Vec<TaskInstance>,
    /// Transitions of both dates.
    pub transitions: Vec<ReviewTransition>,
}

/// Load the records a restarted engine needs for `today`.
///
/// Yesterday is included because a midnight-crossing occurrence began
/// then.
///
/// # Errors
///
/// Returns the first [`PersistError`].
pub async fn load_day<P: PersistenceAdapter>(
    persistence: &P,
    today: NaiveDate,
) -> Result<DayRecords, PersistError> {
    let mut records = DayRecords::default();
    let mut dates = vec![today];
    if let Some(yesterday) = today.pred_opt() {
        dates.insert(0, yesterday);
    }
    for date in dates {
        records
            .instances
            .extend(persistence.load_task_instances(date).await?);
        records
            .transitions
            .extend(persistence.query_transitions(None, date).await?);
    }
    Ok(records)
}

/// Clock, scheduler, and review controller behind one facade.
#[derive(Debug)]
pub struct Engine {
    clock: ClockSource,
    scheduler: PeriodScheduler,
    controller: ReviewWorkflowController,
    /// Next schedule slot per date.
    seqs: BTreeMap<NaiveDate, u32>,
    /// Days of dated shadow slots kept behind today.
    shadow_retention_days: u32,
    tick: u64,
}

impl Engine {
    /// Build an engine from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Catalog`] if the catalog does not validate.
    pub fn new(
        config: &EngineConfig,
        clock: ClockSource,
        bus: Arc<SyncBus>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, EngineError> {
        let catalog = Arc::new(Catalog::from_config(&config.catalog)?);
        let scheduler =
            PeriodScheduler::new(catalog.periods.clone(), config.scheduler.max_catchup_days);
        let controller = ReviewWorkflowController::new(
            catalog,
            config.review.clone(),
            config.persistence.clone(),
            bus,
            notifier,
        );
        info!(
            periods = controller.catalog().periods.len(),
            "Engine initialized"
        );
        Ok(Self {
            clock,
            scheduler,
            controller,
            seqs: BTreeMap::new(),
            shadow_retention_days: config.scheduler.max_catchup_days,
            tick: 0,
        })
    }

    /// Current business time.
    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// The clock.
    pub const fn clock(&self) -> &ClockSource {
        &self.clock
    }

    /// The scheduler.
    pub const fn scheduler(&self) -> &PeriodScheduler {
        &self.scheduler
    }

    /// The review controller.
    pub const fn controller(&self) -> &ReviewWorkflowController {
        &self.controller
    }

    /// Mutable review controller, for the runner's outbox cycle.
    pub const fn controller_mut(&mut self) -> &mut ReviewWorkflowController {
        &mut self.controller
    }

    /// The sync bus.
    pub const fn bus(&self) -> &Arc<SyncBus> {
        self.controller.bus()
    }

    /// The catalog.
    pub const fn catalog(&self) -> &Arc<Catalog> {
        self.controller.catalog()
    }

    /// Ticks run so far.
    pub const fn tick_count(&self) -> u64 {
        self.tick
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Run one scheduler poll.
    pub fn tick(&mut self) -> TickReport {
        self.tick = self.tick.saturating_add(1);
        self.controller.set_tick(self.tick);
        self.adopt_shared_offset();

        let before = self.scheduler.active().cloned();
        let now = self.clock.now();
        let events = match self.scheduler.advance(now) {
            Ok(events) => events,
            Err(e) => {
                warn!("Scheduler anomaly, clearing clock offset and rebasing: {e}");
                let had_offset = self.clock.offset().is_some();
                self.clock.clear_offset();
                if had_offset {
                    self.publish_offset();
                }
                self.scheduler.rebase(self.clock.now());
                Vec::new()
            }
        };

        let mut active = before;
        for event in &events {
            self.handle_event(event, &mut active);
        }
        let overdue = self.controller.sweep_overdue(now);

        if !events.is_empty() || !overdue.is_empty() {
            debug!(
                tick = self.tick,
                %now,
                events = events.len(),
                overdue = overdue.len(),
                "Tick"
            );
        }
        TickReport {
            tick: self.tick,
            now,
            events,
            overdue,
        }
    }

    fn handle_event(&mut self, event: &ScheduleEvent, active: &mut Option<PeriodId>) {
        match event {
            ScheduleEvent::Entered { period, at } => {
                *active = Some(period.clone());
                let occurrence = self.occurrence(period, *at);
                self.controller.activate_period(period, at.date(), *at);
                let logged = self.controller.record_period_transition(
                    ReviewAction::Enter,
                    period,
                    occurrence,
                    *at,
                );
                if logged.is_some() {
                    let seq = self.next_seq(at.date());
                    self.controller.publish_system(
                        *at,
                        SyncPayload::PeriodEntered {
                            period: period.clone(),
                            at: *at,
                            seq,
                        },
                    );
                    self.controller.announce_period(period);
                    info!(%period, %at, "Period entered");
                }
            }
            ScheduleEvent::Exited { period, at } => {
                *active = None;
                let just_before = at.checked_sub_signed(TimeDelta::seconds(1)).unwrap_or(*at);
                let occurrence = self.occurrence(period, just_before);
                let logged = self.controller.record_period_transition(
                    ReviewAction::Exit,
                    period,
                    occurrence,
                    *at,
                );
                if logged.is_some() {
                    let seq = self.next_seq(at.date());
                    self.controller.publish_system(
                        *at,
                        SyncPayload::PeriodExited {
                            period: period.clone(),
                            at: *at,
                            seq,
                        },
                    );
                    info!(%period, %at, "Period exited");
                }
            }
            ScheduleEvent::DayRolled { from, to, at } => {
                let seq = self.next_seq(*to);
                self.controller.publish_system(
                    *at,
                    SyncPayload::DayRolled {
                        from: *from,
                        to: *to,
                        seq,
                    },
                );
                if let Some(period) = active.clone() {
                    let created = self.controller.activate_period(&period, *to, *at);
                    debug!(%period, date = %to, created = created.len(), "Fresh instances after day roll");
                }
                if let Some(cutoff) =
                    to.checked_sub_days(Days::new(u64::from(self.shadow_retention_days)))
                {
                    self.bus().prune_shadow(cutoff);
                }
                info!(%from, %to, "Day rolled");
            }
        }
    }

    fn occurrence(&self, period: &PeriodId, at: NaiveDateTime) -> NaiveDate {
        self.catalog()
            .periods
            .get(period)
            .map_or_else(|| at.date(), |p| occurrence_date(p, at))
    }

    /// Next schedule slot for `date`, seeded from the shadow journal so a
    /// restarted engine does not overwrite earlier slots.
    fn next_seq(&mut self, date: NaiveDate) -> u32 {
        let bus = Arc::clone(self.bus());
        let slot = self.seqs.entry(date).or_insert_with(|| {
            bus.catch_up(&schedule_prefix(date))
                .unwrap_or_default()
                .iter()
                .filter_map(|message| schedule_seq(&message.payload))
                .max()
                .map_or(0, |max| max.saturating_add(1))
        });
        let seq = *slot;
        *slot = slot.saturating_add(1);
        self.seqs.retain(|d, _| *d >= date.pred_opt().unwrap_or(date));
        seq
    }

    // -----------------------------------------------------------------------
    // Clock offset
    // -----------------------------------------------------------------------

    /// Set (`Some`) or clear (`None`) the shared clock offset and publish
    /// it to every engine.
    ///
    /// An offset that moves time backwards rebases the scheduler without
    /// events.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Clock`] for a negative or oversized offset;
    /// the offset is then cleared and the cleared state published.
    pub fn set_clock_offset(&mut self, offset_secs: Option<i64>) -> Result<Option<i64>, EngineError> {
        let result = self.apply_offset(offset_secs);
        self.publish_offset();
        match result {
            Ok(()) => {
                info!(offset_secs = ?self.clock.offset_secs(), "Clock offset changed");
                Ok(self.clock.offset_secs())
            }
            Err(e) => {
                warn!("Rejected clock offset: {e}");
                Err(e.into())
            }
        }
    }

    fn apply_offset(&mut self, offset_secs: Option<i64>) -> Result<(), ClockError> {
        let result = match offset_secs {
            None => {
                self.clock.clear_offset();
                Ok(())
            }
            Some(secs) => match TimeDelta::try_seconds(secs) {
                Some(delta) => self.clock.set_offset(delta),
                None => {
                    self.clock.clear_offset();
                    Err(ClockError::OffsetTooLarge {
                        secs,
                        max_secs: i64::MAX,
                    })
                }
            },
        };
        let now = self.clock.now();
        if self.scheduler.last_observed().is_some_and(|last| now < last) {
            self.scheduler.rebase(now);
        }
        result
    }

    fn publish_offset(&self) {
        self.controller.publish_system(
            self.clock.now(),
            SyncPayload::ClockOffset {
                offset_secs: self.clock.offset_secs(),
            },
        );
    }

    /// Follow an offset set by another engine or session.
    fn adopt_shared_offset(&mut self) {
        let shared = match self.bus().read_shadow(CLOCK_OFFSET_KEY) {
            Ok(Some(message)) => match message.payload {
                SyncPayload::ClockOffset { offset_secs } => offset_secs,
                _ => return,
            },
            Ok(None) => return,
            Err(e) => {
                debug!("Clock offset slot unreadable: {e}");
                return;
            }
        };
        if shared == self.clock.offset_secs() {
            return;
        }
        match self.apply_offset(shared) {
            Ok(()) => info!(offset_secs = ?shared, "Adopted shared clock offset"),
            Err(e) => warn!("Ignoring shared clock offset: {e}"),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The period active now, honoring manual closes.
    pub fn current_period(&self) -> Option<Period> {
        self.scheduler.current_period(self.now()).cloned()
    }

    /// Every instance for `date`.
    pub fn tasks_for_date(&self, date: NaiveDate) -> Vec<TaskInstance> {
        self.controller.book().for_date(date).cloned().collect()
    }

    /// One instance.
    pub fn task(&self, key: &TaskKey) -> Option<TaskInstance> {
        self.controller.book().get(key).cloned()
    }

    /// Evidence references still held by any instance, for external
    /// blob cleanup.
    pub fn live_evidence_refs(&self) -> Vec<EvidenceRef> {
        self.controller.book().live_evidence_refs().into_iter().collect()
    }

    /// Status summary.
    pub fn status(&self) -> EngineStatus {
        let OutboxStatus { pending, unsynced } = self.controller.outbox().status();
        EngineStatus {
            now: self.now(),
            real_now: self.clock.real_now(),
            clock_offset_secs: self.clock.offset_secs(),
            active_period: self.current_period().map(|p| p.id),
            tick: self.tick,
            pending_writes: pending,
            unsynced_writes: unsynced,
            instances: self.controller.book().instances().count(),
        }
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    /// Submit evidence for review at the current business time.
    ///
    /// # Errors
    ///
    /// See [`ReviewWorkflowController::request_review`].
    pub fn request_review(
        &mut self,
        ctx: &SessionContext,
        key: &TaskKey,
        evidence: Vec<EvidenceRef>,
    ) -> Result<SubmitOutcome, EngineError> {
        let now = self.now();
        Ok(self.controller.request_review(ctx, key, evidence, now)?)
    }

    /// Approve or reject.
    ///
    /// # Errors
    ///
    /// See [`ReviewWorkflowController::decide`].
    pub fn decide(
        &mut self,
        ctx: &SessionContext,
        key: &TaskKey,
        verdict: &Verdict,
    ) -> Result<TaskInstance, EngineError> {
        let now = self.now();
        Ok(self.controller.decide(ctx, key, verdict, now)?)
    }

    /// Begin work on a task.
    ///
    /// # Errors
    ///
    /// See [`ReviewWorkflowController::start`].
    pub fn start(&mut self, ctx: &SessionContext, key: &TaskKey) -> Result<TaskInstance, EngineError> {
        let now = self.now();
        Ok(self.controller.start(ctx, key, now)?)
    }

    /// Complete a task without review.
    ///
    /// # Errors
    ///
    /// See [`ReviewWorkflowController::complete`].
    pub fn complete(
        &mut self,
        ctx: &SessionContext,
        key: &TaskKey,
        evidence: Vec<EvidenceRef>,
    ) -> Result<TaskInstance, EngineError> {
        let now = self.now();
        Ok(self.controller.complete(ctx, key, evidence, now)?)
    }

    /// Close the active period early.
    ///
    /// # Errors
    ///
    /// [`ReviewError::Forbidden`] for non-approvers,
    /// [`ScheduleError::NotActive`] if the period is not active, and
    /// [`ReviewError::AlreadyClosed`] if this occurrence was closed before.
    pub fn manual_close(
        &mut self,
        ctx: &SessionContext,
        period: &PeriodId,
    ) -> Result<ReviewTransition, EngineError> {
        let now = self.now();
        self.controller.authorize_approver(ctx, "close periods")?;
        let (occurrence, _exit) = self.scheduler.close(period, now)?;
        let entry = self
            .controller
            .record_manual_close(ctx, period, occurrence, now)?;
        let seq = self.next_seq(now.date());
        self.controller.publish_system(
            now,
            SyncPayload::PeriodClosed {
                period: period.clone(),
                at: now,
                seq,
            },
        );
        Ok(entry)
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    /// Merge transitions written elsewhere (another process, or
    /// persistence). Returns how many were new.
    pub fn merge_transitions(&mut self, transitions: Vec<ReviewTransition>) -> usize {
        let added = self.controller.book_mut().replay(transitions);
        if added > 0 {
            debug!(added, "Merged external transitions");
        }
        added
    }

    /// Replace all state with durable records and drop queued writes.
    pub fn reset_from(&mut self, records: DayRecords) {
        let DayRecords {
            instances,
            transitions,
        } = records;
        info!(
            instances = instances.len(),
            transitions = transitions.len(),
            "Engine reset from persistence"
        );
        self.controller.book_mut().restore(instances, transitions);
        self.controller.outbox_mut().clear();
        self.restore_closures();
    }

    /// Re-apply manual closes found in the log to the scheduler.
    fn restore_closures(&mut self) {
        let closed: Vec<(PeriodId, NaiveDate)> = self
            .controller
            .book()
            .log()
            .entries()
            .iter()
            .filter(|entry| entry.action == ReviewAction::ManualClose)
            .filter_map(|entry| parse_period_target(&entry.target_id))
            .collect();
        for (period, occurrence) in closed {
            self.scheduler.mark_closed(period, occurrence);
        }
    }

    /// Capture the current state.
    pub fn snapshot(&self) -> EngineSnapshot {
        let book = self.controller.book();
        EngineSnapshot {
            taken_at: self.now(),
            clock_offset_secs: self.clock.offset_secs(),
            instances: book.instances().cloned().collect(),
            transitions: book.log().entries().to_vec(),
        }
    }

    /// Resume from a validated snapshot.
    ///
    /// The scheduler resumes from the snapshot instant, so the first tick
    /// replays every boundary crossed while the engine was down.
    pub fn restore(&mut self, snapshot: EngineSnapshot) {
        let EngineSnapshot {
            taken_at,
            clock_offset_secs,
            instances,
            transitions,
        } = snapshot;
        if let Err(e) = self.apply_offset(clock_offset_secs) {
            warn!("Snapshot clock offset rejected: {e}");
        }
        self.controller.book_mut().restore(instances, transitions);
        self.restore_closures();
        let now = self.clock.now();
        if taken_at <= now {
            self.scheduler.rebase(taken_at);
        }
        info!(%taken_at, "Engine restored from snapshot");
    }
}

impl TaskSource for Engine {
    /// Instances of the current period for today, limited to `role`
    /// unless the role is an approver.
    fn visible_tasks(&self, role: &RoleName) -> Vec<TaskInstance> {
        let now = self.now();
        let Some(period) = self.scheduler.current_period(now) else {
            return Vec::new();
        };
        let catalog = self.catalog();
        let approver = self.controller.approves(role);
        self.controller
            .book()
            .for_date(now.date())
            .filter(|instance| {
                catalog
                    .tasks
                    .get(&instance.key.def_id)
                    .is_some_and(|def| def.period_id == period.id && (approver || def.role == *role))
            })
            .cloned()
            .collect()
    }
}

fn parse_period_target(target: &str) -> Option<(PeriodId, NaiveDate)> {
    let (period, date) = target.rsplit_once('@')?;
    Some((PeriodId::from(period), date.parse().ok()?))
}

const fn schedule_seq(payload: &SyncPayload) -> Option<u32> {
    match payload {
        SyncPayload::PeriodEntered { seq, .. }
        | SyncPayload::PeriodExited { seq, .. }
        | SyncPayload::PeriodClosed { seq, .. }
        | SyncPayload::DayRolled { seq, .. } => Some(*seq),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use brigade_types::{
        EvidenceKind, ReviewStatus, SessionId, SyncMessage, TaskDefId, TaskStatus,
    };

    use super::*;
    use crate::clock::ManualClock;
    use crate::collaborators::RecordingNotifier;
    use crate::config::ClockConfig;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn engine_at(start: NaiveDateTime) -> (Engine, ManualClock) {
        let wall = ManualClock::new(start);
        let clock = ClockSource::new(Arc::new(wall.clone()), &ClockConfig::default());
        let engine = Engine::new(
            &EngineConfig::default(),
            clock,
            Arc::new(SyncBus::in_memory()),
            Arc::new(RecordingNotifier::new()),
        )
        .unwrap();
        (engine, wall)
    }

    fn key(def: &str, day: u32) -> TaskKey {
        TaskKey::new(TaskDefId::from(def), at(day, 0, 0).date())
    }

    fn photo() -> Vec<EvidenceRef> {
        vec![EvidenceRef {
            kind: EvidenceKind::Photo,
            url: "memory://evidence/1".to_owned(),
            value: None,
        }]
    }

    #[test]
    fn first_tick_activates_current_period() {
        let (mut engine, _) = engine_at(at(15, 8, 5));
        let report = engine.tick();
        assert_eq!(report.events.len(), 1);
        let kitchen = engine.visible_tasks(&RoleName::from("kitchen"));
        assert_eq!(kitchen.len(), 1);
        let manager = engine.visible_tasks(&RoleName::from("manager"));
        assert_eq!(manager.len(), 2);
        assert!(engine.controller().book().log().any_on(ReviewAction::Enter, "opening@2026-10-15"));
    }

    #[test]
    fn restart_does_not_relog_enter() {
        let (mut engine, _) = engine_at(at(15, 8, 5));
        engine.tick();
        let snapshot = engine.snapshot();

        let (mut restarted, _) = engine_at(at(15, 8, 6));
        restarted.restore(snapshot);
        restarted.tick();
        let enters = restarted
            .controller()
            .book()
            .log()
            .entries()
            .iter()
            .filter(|e| e.action == ReviewAction::Enter)
            .count();
        assert_eq!(enters, 1);
    }

    #[test]
    fn day_roll_in_closing_creates_fresh_instances() {
        let (mut engine, wall) = engine_at(at(15, 21, 40));
        engine.tick();
        let ctx = SessionContext::new("kim", "kitchen");
        engine.request_review(&ctx, &key("closing-1", 15), photo()).unwrap();

        wall.set(at(16, 0, 10));
        let report = engine.tick();
        let rolls = report
            .events
            .iter()
            .filter(|e| matches!(e, ScheduleEvent::DayRolled { .. }))
            .count();
        assert_eq!(rolls, 1);

        let yesterday = engine.task(&key("closing-1", 15)).unwrap();
        assert_eq!(yesterday.review_status, Some(ReviewStatus::InReview));
        let today = engine.task(&key("closing-1", 16)).unwrap();
        assert_eq!(today.review_status, Some(ReviewStatus::NotSubmitted));
        assert_eq!(today.submission_count, 0);
    }

    #[test]
    fn day_roll_prunes_shadow_slots_past_the_horizon() {
        let mut config = EngineConfig::default();
        config.scheduler.max_catchup_days = 2;
        let wall = ManualClock::new(at(15, 21, 40));
        let bus = Arc::new(SyncBus::in_memory());
        let mut engine = Engine::new(
            &config,
            ClockSource::new(Arc::new(wall.clone()), &ClockConfig::default()),
            Arc::clone(&bus),
            Arc::new(RecordingNotifier::new()),
        )
        .unwrap();
        let stale = SyncMessage::new(
            SessionId::new(),
            at(1, 9, 0),
            SyncPayload::TaskCompleted {
                key: key("opening-2", 1),
            },
        );
        bus.publish(&stale);
        engine.tick();

        wall.set(at(16, 0, 10));
        engine.tick();
        assert!(bus.shadow().read(&stale.shadow_key()).unwrap().is_none());
        assert!(!bus
            .shadow()
            .scan(&schedule_prefix(at(15, 0, 0).date()))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn manual_close_hides_period_and_rejects_repeat() {
        let (mut engine, wall) = engine_at(at(15, 8, 5));
        engine.tick();
        let manager = SessionContext::new("ana", "manager");
        let cook = SessionContext::new("kim", "kitchen");
        let period = PeriodId::from("opening");

        assert!(matches!(
            engine.manual_close(&cook, &period),
            Err(EngineError::Review(ReviewError::Forbidden { .. }))
        ));
        engine.manual_close(&manager, &period).unwrap();
        assert!(engine.current_period().is_none());
        assert!(engine.visible_tasks(&RoleName::from("kitchen")).is_empty());
        assert!(matches!(
            engine.manual_close(&manager, &period),
            Err(EngineError::Schedule(ScheduleError::NotActive(_)))
        ));

        wall.set(at(15, 11, 5));
        let report = engine.tick();
        assert_eq!(
            report.events,
            vec![ScheduleEvent::Entered {
                period: PeriodId::from("lunch_service"),
                at: at(15, 11, 0),
            }]
        );
    }

    #[test]
    fn overdue_is_flagged_by_tick() {
        let (mut engine, wall) = engine_at(at(15, 8, 5));
        engine.tick();
        wall.set(at(15, 9, 5));
        let report = engine.tick();
        assert_eq!(report.overdue, vec![key("opening-2", 15)]);
        assert_eq!(
            engine.task(&key("opening-2", 15)).unwrap().status,
            TaskStatus::Overdue
        );
        assert_eq!(
            engine.task(&key("opening-1", 15)).unwrap().status,
            TaskStatus::Pending
        );
    }

    #[test]
    fn reset_from_lagging_rows_keeps_the_logged_submit() {
        let (mut origin, _) = engine_at(at(15, 8, 5));
        origin.tick();
        let rows: Vec<TaskInstance> = origin.tasks_for_date(at(15, 0, 0).date());
        let cook = SessionContext::new("kim", "kitchen");
        origin
            .request_review(&cook, &key("opening-1", 15), photo())
            .unwrap();

        let (mut restarted, _) = engine_at(at(15, 8, 5));
        restarted.reset_from(DayRecords {
            instances: rows,
            transitions: origin.snapshot().transitions,
        });
        let task = restarted.task(&key("opening-1", 15)).unwrap();
        assert_eq!(task.review_status, Some(ReviewStatus::InReview));
        assert_eq!(task.submission_count, 1);

        let again = restarted
            .request_review(&cook, &key("opening-1", 15), photo())
            .unwrap();
        assert!(matches!(again, SubmitOutcome::Coalesced(_)));
        let submits = restarted
            .controller()
            .book()
            .log()
            .entries()
            .iter()
            .filter(|e| e.action == ReviewAction::Submit)
            .count();
        assert_eq!(submits, 1);
    }

    #[test]
    fn offset_is_shared_through_the_shadow() {
        let bus = Arc::new(SyncBus::in_memory());
        let make = |bus: &Arc<SyncBus>| {
            let wall = ManualClock::new(at(15, 8, 5));
            Engine::new(
                &EngineConfig::default(),
                ClockSource::new(Arc::new(wall), &ClockConfig::default()),
                Arc::clone(bus),
                Arc::new(RecordingNotifier::new()),
            )
            .unwrap()
        };
        let mut first = make(&bus);
        let mut second = make(&bus);
        first.tick();
        second.tick();

        first.set_clock_offset(Some(3600)).unwrap();
        second.tick();
        assert_eq!(second.clock().offset_secs(), Some(3600));
        assert_eq!(second.now(), at(15, 9, 5));
    }

    #[test]
    fn negative_offset_is_rejected_and_cleared() {
        let (mut engine, _) = engine_at(at(15, 8, 5));
        engine.set_clock_offset(Some(600)).unwrap();
        assert!(matches!(
            engine.set_clock_offset(Some(-60)),
            Err(EngineError::Clock(ClockError::NegativeOffset { .. }))
        ));
        assert_eq!(engine.clock().offset_secs(), None);
    }

    #[test]
    fn lowering_the_offset_rebases_without_events() {
        let (mut engine, _) = engine_at(at(15, 8, 5));
        engine.set_clock_offset(Some(3 * 3600)).unwrap();
        engine.tick();
        assert_eq!(engine.current_period().map(|p| p.id), Some(PeriodId::from("lunch_service")));
        engine.set_clock_offset(None).unwrap();
        let report = engine.tick();
        assert!(report.events.is_empty());
        assert_eq!(engine.clock().offset_secs(), None);
    }

    #[test]
    fn schedule_slots_continue_after_restart() {
        let bus = Arc::new(SyncBus::in_memory());
        let wall = ManualClock::new(at(15, 8, 5));
        let build = || {
            Engine::new(
                &EngineConfig::default(),
                ClockSource::new(Arc::new(wall.clone()), &ClockConfig::default()),
                Arc::clone(&bus),
                Arc::new(RecordingNotifier::new()),
            )
            .unwrap()
        };
        let mut engine = build();
        engine.tick();
        wall.set(at(15, 11, 5));
        engine.tick();

        let mut restarted = build();
        restarted.restore(engine.snapshot());
        wall.set(at(15, 15, 5));
        restarted.tick();
        restarted.tick();

        let journal = bus.catch_up(&schedule_prefix(at(15, 0, 0).date())).unwrap();
        let seqs: Vec<u32> = journal
            .iter()
            .filter_map(|m| schedule_seq(&m.payload))
            .collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }
}
