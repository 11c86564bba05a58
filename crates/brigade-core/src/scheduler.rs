//! Period scheduler: resolves the active period and emits transitions.
//!
//! The scheduler is polled with the current business instant. Between two
//! polls it walks every boundary instant (period starts and ends, plus
//! midnight) in chronological order and emits the transitions observed
//! at each one, stamped with the boundary instant. A single jump from
//! 10:05 to 21:35 therefore yields the same event sequence as polling
//! every second in between.
//!
//! At each boundary the order is: exit, then day roll, then enter.

use std::collections::BTreeSet;

use brigade_types::{Period, PeriodId, ScheduleEvent};
use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use tracing::{debug, warn};

use crate::catalog::{PeriodCatalog, occurrence_date};
use crate::clock::ClockError;

/// Errors raised by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    /// The clock misbehaved (time moved backwards).
    #[error(transparent)]
    Clock(#[from] ClockError),

    /// A period id is not in the catalog.
    #[error("unknown period {0}")]
    UnknownPeriod(PeriodId),

    /// The period is not currently active, so it cannot be closed.
    #[error("period {0} is not active")]
    NotActive(PeriodId),
}

/// What the scheduler saw at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Active period, if any.
    pub period: Option<PeriodId>,
    /// Calendar date of the instant.
    pub date: NaiveDate,
}

/// Difference between two observations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transition {
    /// Period that became active.
    pub entered: Option<PeriodId>,
    /// Period that stopped being active.
    pub exited: Option<PeriodId>,
    /// Calendar change `(from, to)`.
    pub day_rolled: Option<(NaiveDate, NaiveDate)>,
}

impl Transition {
    /// Whether nothing changed.
    pub const fn is_empty(&self) -> bool {
        self.entered.is_none() && self.exited.is_none() && self.day_rolled.is_none()
    }

    /// Expand into events stamped at `at`, in exit / day roll / enter order.
    pub fn into_events(self, at: NaiveDateTime) -> Vec<ScheduleEvent> {
        let mut events = Vec::new();
        if let Some(period) = self.exited {
            events.push(ScheduleEvent::Exited { period, at });
        }
        if let Some((from, to)) = self.day_rolled {
            events.push(ScheduleEvent::DayRolled { from, to, at });
        }
        if let Some(period) = self.entered {
            events.push(ScheduleEvent::Entered { period, at });
        }
        events
    }
}

/// Compare two observations.
///
/// A day roll is reported whenever the date changes, even if the period
/// identity is unchanged (a midnight-crossing period stays active).
pub fn detect_transition(previous: &Observation, current: &Observation) -> Transition {
    let period_changed = previous.period != current.period;
    Transition {
        entered: if period_changed {
            current.period.clone()
        } else {
            None
        },
        exited: if period_changed {
            previous.period.clone()
        } else {
            None
        },
        day_rolled: (previous.date != current.date).then_some((previous.date, current.date)),
    }
}

/// Stateful period scheduler.
#[derive(Debug, Clone)]
pub struct PeriodScheduler {
    catalog: PeriodCatalog,
    max_catchup_days: u32,
    /// Last instant observed.
    last: Option<NaiveDateTime>,
    /// Period active at `last`.
    current: Option<PeriodId>,
    /// Manually closed occurrences, keyed by the date the occurrence began.
    closed: BTreeSet<(NaiveDate, PeriodId)>,
}

impl PeriodScheduler {
    /// Create a scheduler that has not observed any instant yet.
    pub const fn new(catalog: PeriodCatalog, max_catchup_days: u32) -> Self {
        Self {
            catalog,
            max_catchup_days,
            last: None,
            current: None,
            closed: BTreeSet::new(),
        }
    }

    /// The period catalog.
    pub const fn catalog(&self) -> &PeriodCatalog {
        &self.catalog
    }

    /// The period active at `now`, honoring manual closures.
    pub fn current_period(&self, now: NaiveDateTime) -> Option<&Period> {
        self.catalog
            .active_at(now.time())
            .filter(|p| !self.closed.contains(&(occurrence_date(p, now), p.id.clone())))
    }

    /// The period active at the last observed instant.
    pub const fn active(&self) -> Option<&PeriodId> {
        self.current.as_ref()
    }

    /// The last observed instant.
    pub const fn last_observed(&self) -> Option<NaiveDateTime> {
        self.last
    }

    fn observe(&self, at: NaiveDateTime) -> Observation {
        Observation {
            period: self.current_period(at).map(|p| p.id.clone()),
            date: at.date(),
        }
    }

    /// Advance to `now` and return every transition crossed since the
    /// previous poll.
    ///
    /// The first poll enters the period active at `now` (if any).
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::WentBackwards`] if `now` precedes the last
    /// observed instant. State is left unchanged; call
    /// [`rebase`](Self::rebase) after handling the anomaly.
    pub fn advance(&mut self, now: NaiveDateTime) -> Result<Vec<ScheduleEvent>, ScheduleError> {
        let Some(mut cursor) = self.last else {
            let observed = self.observe(now);
            self.last = Some(now);
            self.current.clone_from(&observed.period);
            return Ok(observed
                .period
                .map(|period| vec![ScheduleEvent::Entered { period, at: now }])
                .unwrap_or_default());
        };

        if now < cursor {
            return Err(ClockError::WentBackwards {
                previous: cursor,
                now,
            }
            .into());
        }

        let mut events = Vec::new();
        let mut state = Observation {
            period: self.current.clone(),
            date: cursor.date(),
        };

        let span_days = now.date().signed_duration_since(cursor.date()).num_days();
        if span_days > i64::from(self.max_catchup_days) {
            warn!(
                from = %cursor,
                to = %now,
                max_catchup_days = self.max_catchup_days,
                "Clock anomaly: jump exceeds catch-up window, replaying final day only"
            );
            let midnight = now.date().and_time(NaiveTime::MIN);
            let skipped = Transition {
                entered: None,
                exited: state.period.take(),
                day_rolled: Some((state.date, midnight.date())),
            };
            events.extend(skipped.into_events(midnight));
            let at_midnight = self.observe(midnight);
            if let Some(period) = at_midnight.period.clone() {
                events.push(ScheduleEvent::Entered {
                    period,
                    at: midnight,
                });
            }
            state = at_midnight;
            cursor = midnight;
        }

        for boundary in self.boundaries(cursor, now) {
            let next = self.observe(boundary);
            let transition = detect_transition(&state, &next);
            if !transition.is_empty() {
                debug!(at = %boundary, ?transition, "Schedule boundary");
                events.extend(transition.into_events(boundary));
            }
            state = next;
        }

        self.last = Some(now);
        self.current = state.period;
        Ok(events)
    }

    /// Every boundary instant in `(after, until]`, sorted.
    fn boundaries(&self, after: NaiveDateTime, until: NaiveDateTime) -> Vec<NaiveDateTime> {
        let mut instants = BTreeSet::new();
        let mut day = after.date();
        while day <= until.date() {
            instants.insert(day.and_time(NaiveTime::MIN));
            for period in self.catalog.iter() {
                instants.insert(day.and_time(period.start));
                instants.insert(day.and_time(period.end));
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        instants
            .into_iter()
            .filter(|instant| *instant > after && *instant <= until)
            .collect()
    }

    /// Reset the observation point to `now` without emitting events.
    pub fn rebase(&mut self, now: NaiveDateTime) {
        self.last = Some(now);
        self.current = self.observe(now).period;
        debug!(at = %now, current = ?self.current, "Scheduler rebased");
    }

    /// Close the active occurrence of `period` early. It stays inactive
    /// until its window ends naturally.
    ///
    /// Returns the exit event stamped at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::UnknownPeriod`] or
    /// [`ScheduleError::NotActive`].
    pub fn close(
        &mut self,
        period: &PeriodId,
        now: NaiveDateTime,
    ) -> Result<(NaiveDate, ScheduleEvent), ScheduleError> {
        let Some(def) = self.catalog.get(period) else {
            return Err(ScheduleError::UnknownPeriod(period.clone()));
        };
        if self.current_period(now).map(|p| &p.id) != Some(period) {
            return Err(ScheduleError::NotActive(period.clone()));
        }
        let occurrence = occurrence_date(def, now);
        self.closed.insert((occurrence, period.clone()));
        if self.last.is_none_or(|last| last < now) {
            self.last = Some(now);
        }
        self.current = None;
        self.prune_closed(now.date());
        Ok((
            occurrence,
            ScheduleEvent::Exited {
                period: period.clone(),
                at: now,
            },
        ))
    }

    /// Record a close that happened before a restart.
    pub fn mark_closed(&mut self, period: PeriodId, occurrence: NaiveDate) {
        self.closed.insert((occurrence, period));
    }

    /// Drop closures that can no longer affect any window.
    fn prune_closed(&mut self, today: NaiveDate) {
        let horizon = today.checked_sub_days(Days::new(2)).unwrap_or(today);
        self.closed.retain(|(date, _)| *date >= horizon);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::catalog::Catalog;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn scheduler() -> PeriodScheduler {
        PeriodScheduler::new(Catalog::builtin().unwrap().periods, 31)
    }

    fn names(events: &[ScheduleEvent]) -> Vec<String> {
        events
            .iter()
            .map(|event| match event {
                ScheduleEvent::Entered { period, .. } => format!("+{period}"),
                ScheduleEvent::Exited { period, .. } => format!("-{period}"),
                ScheduleEvent::DayRolled { to, .. } => format!("day {to}"),
            })
            .collect()
    }

    #[test]
    fn first_poll_enters_current_period() {
        let mut s = scheduler();
        let events = s.advance(at(15, 10, 5)).unwrap();
        assert_eq!(names(&events), vec!["+opening"]);
        assert_eq!(s.active(), Some(&PeriodId::from("opening")));
    }

    #[test]
    fn between_periods_is_none() {
        let s = scheduler();
        assert!(s.current_period(at(15, 3, 0)).is_none());
        assert!(s.current_period(at(15, 7, 59)).is_none());
    }

    #[test]
    fn jump_synthesizes_every_boundary_in_order() {
        let mut s = scheduler();
        s.advance(at(15, 10, 5)).unwrap();
        let events = s.advance(at(15, 21, 35)).unwrap();
        assert_eq!(
            names(&events),
            vec![
                "-opening",
                "+lunch_service",
                "-lunch_service",
                "+lunch_closing",
                "-lunch_closing",
                "+dinner_prep",
                "-dinner_prep",
                "+dinner_service",
                "-dinner_service",
                "+closing",
            ]
        );
        assert_eq!(events.first().map(ScheduleEvent::at), Some(at(15, 11, 0)));
        assert_eq!(events.last().map(ScheduleEvent::at), Some(at(15, 21, 30)));
    }

    #[test]
    fn stepwise_equals_direct_jump() {
        let mut direct = scheduler();
        let mut stepwise = scheduler();
        direct.advance(at(15, 10, 5)).unwrap();
        stepwise.advance(at(15, 10, 5)).unwrap();

        let jumped = direct.advance(at(16, 9, 0)).unwrap();
        let mut stepped = Vec::new();
        let mut t = at(15, 10, 5);
        while t < at(16, 9, 0) {
            t = t.checked_add_signed(TimeDelta::minutes(7)).unwrap().min(at(16, 9, 0));
            stepped.extend(stepwise.advance(t).unwrap());
        }
        assert_eq!(jumped, stepped);
    }

    #[test]
    fn day_roll_inside_midnight_period_is_reported_once() {
        let mut s = scheduler();
        s.advance(at(15, 23, 0)).unwrap();
        let events = s.advance(at(16, 0, 30)).unwrap();
        assert_eq!(
            events,
            vec![ScheduleEvent::DayRolled {
                from: at(15, 0, 0).date(),
                to: at(16, 0, 0).date(),
                at: at(16, 0, 0),
            }]
        );
        assert_eq!(s.active(), Some(&PeriodId::from("closing")));
        let later = s.advance(at(16, 0, 45)).unwrap();
        assert!(later.is_empty());
    }

    #[test]
    fn backwards_time_is_an_anomaly() {
        let mut s = scheduler();
        s.advance(at(15, 12, 0)).unwrap();
        let err = s.advance(at(15, 11, 0)).unwrap_err();
        assert!(matches!(
            err,
            ScheduleError::Clock(ClockError::WentBackwards { .. })
        ));
        s.rebase(at(15, 11, 0));
        assert!(s.advance(at(15, 11, 30)).unwrap().is_empty());
    }

    #[test]
    fn oversized_jump_replays_only_final_day() {
        let mut s = PeriodScheduler::new(Catalog::builtin().unwrap().periods, 2);
        s.advance(at(1, 12, 0)).unwrap();
        let events = s.advance(at(15, 9, 0)).unwrap();
        assert_eq!(
            names(&events),
            vec![
                "-lunch_service",
                "day 2026-10-15",
                "+closing",
                "-closing",
                "+opening"
            ]
        );
    }

    #[test]
    fn manual_close_holds_until_window_ends() {
        let mut s = scheduler();
        s.advance(at(15, 22, 0)).unwrap();
        let (occurrence, exit) = s.close(&PeriodId::from("closing"), at(15, 23, 0)).unwrap();
        assert_eq!(occurrence, at(15, 0, 0).date());
        assert!(matches!(exit, ScheduleEvent::Exited { .. }));
        assert!(s.current_period(at(16, 0, 30)).is_none());

        let events = s.advance(at(16, 10, 0)).unwrap();
        assert_eq!(names(&events), vec!["day 2026-10-16", "+opening"]);
    }

    #[test]
    fn closing_an_inactive_period_fails() {
        let mut s = scheduler();
        s.advance(at(15, 9, 0)).unwrap();
        assert_eq!(
            s.close(&PeriodId::from("closing"), at(15, 9, 0)),
            Err(ScheduleError::NotActive(PeriodId::from("closing")))
        );
    }

    #[test]
    fn detect_transition_reports_day_roll_with_same_period() {
        let prev = Observation {
            period: Some(PeriodId::from("closing")),
            date: at(15, 0, 0).date(),
        };
        let cur = Observation {
            period: Some(PeriodId::from("closing")),
            date: at(16, 0, 0).date(),
        };
        let t = detect_transition(&prev, &cur);
        assert!(t.entered.is_none() && t.exited.is_none());
        assert!(t.day_rolled.is_some());
    }
}
