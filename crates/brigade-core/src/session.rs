//! Client-side session projection.
//!
//! A [`SessionView`] is what one open client holds: the tasks visible to
//! its role plus a stale flag. Every sync hint marks the view stale; the
//! client then re-fetches from a [`TaskSource`] instead of trusting the
//! payload. Rejections addressed to the view's user are kept as notices
//! so the submitter sees why.
//!
//! A view opened after events were published cannot receive them on the
//! ephemeral tier; [`SessionView::catch_up`] replays the day's schedule
//! journal from the shadow store instead.

use std::sync::{Arc, Mutex};

use brigade_sync::{SyncBus, SyncError, Subscription};
use brigade_types::{
    RoleName, ScheduleEvent, SyncMessage, SyncPayload, TaskInstance, TaskKey, schedule_prefix,
};
use chrono::NaiveDate;
use tracing::debug;

use crate::review::SessionContext;

/// Authoritative task state a session re-fetches from.
pub trait TaskSource {
    /// Tasks currently visible to `role`.
    fn visible_tasks(&self, role: &RoleName) -> Vec<TaskInstance>;
}

/// A rejection addressed to this session's user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectionNotice {
    /// The rejected task.
    pub key: TaskKey,
    /// The reviewer's reason.
    pub reason: String,
}

#[derive(Debug, Default)]
struct ViewState {
    stale: bool,
    hints: usize,
    notices: Vec<RejectionNotice>,
}

/// One open client session.
#[derive(Debug)]
pub struct SessionView {
    ctx: SessionContext,
    state: Arc<Mutex<ViewState>>,
    tasks: Vec<TaskInstance>,
    _subscription: Subscription,
}

impl SessionView {
    /// Open a view and subscribe it to every message type.
    ///
    /// The view starts stale so the first [`refresh`](Self::refresh)
    /// loads its tasks.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the ephemeral channel refuses the
    /// subscription.
    pub fn open(ctx: SessionContext, bus: &SyncBus) -> Result<Self, SyncError> {
        let state = Arc::new(Mutex::new(ViewState {
            stale: true,
            ..ViewState::default()
        }));
        let sink = Arc::clone(&state);
        let user = ctx.user_id.clone();
        let subscription = bus.subscribe_all(
            ctx.session_id,
            Arc::new(move |message: &SyncMessage| {
                let Ok(mut state) = sink.lock() else {
                    return;
                };
                state.stale = true;
                state.hints = state.hints.saturating_add(1);
                match &message.payload {
                    SyncPayload::TaskRejected {
                        key,
                        reason,
                        submitter: Some(submitter),
                    } if *submitter == user => {
                        state.notices.push(RejectionNotice {
                            key: key.clone(),
                            reason: reason.clone(),
                        });
                    }
                    _ => {}
                }
            }),
        )?;
        debug!(session = %ctx.session_id, user = %ctx.user_id, "Session view opened");
        Ok(Self {
            ctx,
            state,
            tasks: Vec::new(),
            _subscription: subscription,
        })
    }

    /// The session's context.
    pub const fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Whether a hint arrived since the last refresh.
    pub fn is_stale(&self) -> bool {
        self.state.lock().is_ok_and(|state| state.stale)
    }

    /// How many hints this view has received.
    pub fn hints_received(&self) -> usize {
        self.state.lock().map_or(0, |state| state.hints)
    }

    /// Drain pending rejection notices.
    pub fn take_notices(&self) -> Vec<RejectionNotice> {
        self.state
            .lock()
            .map(|mut state| std::mem::take(&mut state.notices))
            .unwrap_or_default()
    }

    /// Re-fetch visible tasks and clear the stale flag.
    pub fn refresh<S: TaskSource + ?Sized>(&mut self, source: &S) -> &[TaskInstance] {
        self.tasks = source.visible_tasks(&self.ctx.role);
        if let Ok(mut state) = self.state.lock() {
            state.stale = false;
        }
        &self.tasks
    }

    /// Tasks as of the last refresh.
    pub fn tasks(&self) -> &[TaskInstance] {
        &self.tasks
    }

    /// Replay the schedule journal of `date` from the shadow store.
    ///
    /// Manual closes are reported as exits.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the shadow store cannot be scanned.
    pub fn catch_up(&self, bus: &SyncBus, date: NaiveDate) -> Result<Vec<ScheduleEvent>, SyncError> {
        let events: Vec<ScheduleEvent> = bus
            .catch_up(&schedule_prefix(date))?
            .into_iter()
            .filter_map(|message| match message.payload {
                SyncPayload::PeriodEntered { period, at, .. } => {
                    Some(ScheduleEvent::Entered { period, at })
                }
                SyncPayload::PeriodExited { period, at, .. }
                | SyncPayload::PeriodClosed { period, at, .. } => {
                    Some(ScheduleEvent::Exited { period, at })
                }
                SyncPayload::DayRolled { from, to, .. } => Some(ScheduleEvent::DayRolled {
                    from,
                    to,
                    at: message.timestamp,
                }),
                _ => None,
            })
            .collect();
        debug!(session = %self.ctx.session_id, %date, events = events.len(), "Schedule catch-up");
        Ok(events)
    }
}
