//! End-to-end behavior of one service day.
//!
//! Engines run against a manual wall clock and in-memory collaborators,
//! so every scenario is deterministic.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::sync::Arc;

use brigade_core::catalog::window_contains;
use brigade_core::clock::{ClockSource, ManualClock};
use brigade_core::collaborators::{RecordingNotifier, TracingNotifier};
use brigade_core::config::{ClockConfig, EngineConfig};
use brigade_core::engine::Engine;
use brigade_core::review::SessionContext;
use brigade_core::session::{SessionView, TaskSource};
use brigade_core::tasks::SubmitOutcome;
use brigade_sync::SyncBus;
use brigade_types::{
    EvidenceKind, EvidenceRef, Period, PeriodId, ReviewStatus, RoleName, ScheduleEvent,
    TaskDefId, TaskKey, TaskStatus, Verdict,
};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 10, day)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn engine_with(config: &EngineConfig, wall: &ManualClock, bus: &Arc<SyncBus>) -> Engine {
    Engine::new(
        config,
        ClockSource::new(Arc::new(wall.clone()), &ClockConfig::default()),
        Arc::clone(bus),
        Arc::new(RecordingNotifier::new()),
    )
    .unwrap()
}

fn key(def: &str, day: u32) -> TaskKey {
    TaskKey::new(TaskDefId::from(def), at(day, 0, 0).date())
}

fn photo(url: &str) -> Vec<EvidenceRef> {
    vec![EvidenceRef {
        kind: EvidenceKind::Photo,
        url: url.to_owned(),
        value: None,
    }]
}

fn label(event: &ScheduleEvent) -> String {
    match event {
        ScheduleEvent::Entered { period, at } => format!("+{period}@{}", at.time()),
        ScheduleEvent::Exited { period, at } => format!("-{period}@{}", at.time()),
        ScheduleEvent::DayRolled { to, .. } => format!("day {to}"),
    }
}

#[test]
fn midnight_window_matches_late_and_early_hours_only() {
    let period = Period {
        id: PeriodId::from("closing"),
        display_name: "Closing".to_owned(),
        start: NaiveTime::from_hms_opt(21, 30, 0).unwrap(),
        end: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        order: 6,
    };
    let tod = |h| NaiveTime::from_hms_opt(h, 0, 0).unwrap();
    assert!(window_contains(&period, tod(23)));
    assert!(window_contains(&period, tod(3)));
    assert!(!window_contains(&period, tod(9)));
    assert!(!window_contains(&period, tod(20)));
}

#[test]
fn jump_to_closing_is_replayed_in_order_for_a_late_session() {
    let config = EngineConfig::default();
    let bus = Arc::new(SyncBus::in_memory());
    let wall = ManualClock::new(at(15, 10, 5));
    let mut engine = engine_with(&config, &wall, &bus);

    let first = engine.tick();
    assert_eq!(engine.current_period().map(|p| p.id), Some(PeriodId::from("opening")));
    assert_eq!(
        engine.task(&key("opening-1", 15)).map(|t| t.status),
        Some(TaskStatus::Pending)
    );

    wall.set(at(15, 21, 35));
    let jump = engine.tick();
    assert_eq!(engine.current_period().map(|p| p.id), Some(PeriodId::from("closing")));
    let labels: Vec<String> = jump.events.iter().map(label).collect();
    assert_eq!(
        labels,
        vec![
            "-opening@11:00:00",
            "+lunch_service@11:00:00",
            "-lunch_service@15:00:00",
            "+lunch_closing@15:00:00",
            "-lunch_closing@16:00:00",
            "+dinner_prep@16:00:00",
            "-dinner_prep@17:30:00",
            "+dinner_service@17:30:00",
            "-dinner_service@21:30:00",
            "+closing@21:30:00",
        ]
    );

    let late = SessionView::open(SessionContext::new("ana", "manager"), &bus).unwrap();
    let replayed = late.catch_up(&bus, at(15, 0, 0).date()).unwrap();
    let mut expected = first.events;
    expected.extend(jump.events);
    assert_eq!(replayed, expected);
}

#[test]
fn stepwise_polling_equals_a_direct_jump() {
    let config = EngineConfig::default();
    let start = at(15, 10, 5);
    let end = at(16, 9, 0);

    let step_wall = ManualClock::new(start);
    let mut stepwise = engine_with(&config, &step_wall, &Arc::new(SyncBus::in_memory()));
    let jump_wall = ManualClock::new(start);
    let mut direct = engine_with(&config, &jump_wall, &Arc::new(SyncBus::in_memory()));

    let mut step_events = stepwise.tick().events;
    let mut now = start;
    while now < end {
        now = now.checked_add_signed(TimeDelta::minutes(7)).unwrap().min(end);
        step_wall.set(now);
        step_events.extend(stepwise.tick().events);
    }

    let mut jump_events = direct.tick().events;
    jump_wall.set(end);
    jump_events.extend(direct.tick().events);

    assert_eq!(step_events, jump_events);
    let summary = |engine: &Engine| {
        let mut rows: Vec<(TaskKey, TaskStatus)> = [15, 16]
            .iter()
            .flat_map(|day| engine.tasks_for_date(at(*day, 0, 0).date()))
            .map(|t| (t.key, t.status))
            .collect();
        rows.sort();
        rows
    };
    assert_eq!(summary(&stepwise), summary(&direct));
}

#[test]
fn duplicate_submit_counts_once() {
    let bus = Arc::new(SyncBus::in_memory());
    let wall = ManualClock::new(at(15, 8, 5));
    let mut engine = engine_with(&EngineConfig::default(), &wall, &bus);
    engine.tick();
    let cook = SessionContext::new("kim", "kitchen");

    engine
        .request_review(&cook, &key("opening-1", 15), photo("memory://a"))
        .unwrap();
    wall.advance(TimeDelta::seconds(3));
    let again = engine
        .request_review(&cook, &key("opening-1", 15), photo("memory://a"))
        .unwrap();

    assert!(matches!(again, SubmitOutcome::Coalesced(_)));
    assert_eq!(engine.task(&key("opening-1", 15)).unwrap().submission_count, 1);
}

#[test]
fn reject_resubmit_approve_converges_in_another_engine() {
    let wall = ManualClock::new(at(15, 8, 5));
    let bus = Arc::new(SyncBus::in_memory());
    let mut origin = engine_with(&EngineConfig::default(), &wall, &bus);
    origin.tick();

    let cook = SessionContext::new("kim", "kitchen");
    let manager = SessionContext::new("ana", "manager");
    let k = key("opening-1", 15);

    let mut cook_view = SessionView::open(cook.clone(), &bus).unwrap();
    cook_view.refresh(&origin);

    origin.request_review(&cook, &k, photo("memory://1")).unwrap();
    wall.advance(TimeDelta::minutes(1));
    origin
        .decide(
            &manager,
            &k,
            &Verdict::Reject {
                reason: "thermometer not in frame".to_owned(),
            },
        )
        .unwrap();
    assert!(cook_view.is_stale());
    let notices = cook_view.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].reason, "thermometer not in frame");

    wall.advance(TimeDelta::minutes(1));
    origin.request_review(&cook, &k, photo("memory://2")).unwrap();
    wall.advance(TimeDelta::minutes(1));
    let approved = origin.decide(&manager, &k, &Verdict::Approve).unwrap();

    assert_eq!(approved.review_status, Some(ReviewStatus::Approved));
    assert_eq!(approved.submission_count, 2);
    assert_eq!(approved.rejection_reason.as_deref(), Some("thermometer not in frame"));

    // A second engine rebuilds the same state from the log alone, in any
    // order and any number of times.
    let other_wall = ManualClock::new(at(15, 8, 10));
    let mut replica = Engine::new(
        &EngineConfig::default(),
        ClockSource::new(Arc::new(other_wall), &ClockConfig::default()),
        Arc::new(SyncBus::in_memory()),
        Arc::new(TracingNotifier),
    )
    .unwrap();
    let mut log = origin.controller().book().log().entries().to_vec();
    log.reverse();
    replica.merge_transitions(log.clone());
    assert_eq!(replica.merge_transitions(log), 0);

    let rebuilt = replica.task(&k).unwrap();
    assert_eq!(rebuilt.review_status, approved.review_status);
    assert_eq!(rebuilt.status, approved.status);
    assert_eq!(rebuilt.submission_count, approved.submission_count);
    assert_eq!(rebuilt.rejection_reason, approved.rejection_reason);
    assert_eq!(rebuilt.evidence_refs, approved.evidence_refs);
}

#[test]
fn day_roll_inside_closing_leaves_yesterday_untouched() {
    let bus = Arc::new(SyncBus::in_memory());
    let wall = ManualClock::new(at(15, 22, 0));
    let mut engine = engine_with(&EngineConfig::default(), &wall, &bus);
    engine.tick();
    let cook = SessionContext::new("kim", "kitchen");
    engine
        .request_review(&cook, &key("closing-1", 15), photo("memory://night"))
        .unwrap();
    let before = engine.task(&key("closing-1", 15)).unwrap();

    wall.set(at(16, 0, 30));
    let report = engine.tick();
    let rolls: Vec<&ScheduleEvent> = report
        .events
        .iter()
        .filter(|e| matches!(e, ScheduleEvent::DayRolled { .. }))
        .collect();
    assert_eq!(rolls.len(), 1);

    assert_eq!(engine.task(&key("closing-1", 15)).unwrap(), before);
    let fresh = engine.task(&key("closing-1", 16)).unwrap();
    assert_eq!(fresh.submission_count, 0);
    assert_eq!(fresh.status, TaskStatus::Pending);
    let visible = engine.visible_tasks(&RoleName::from("kitchen"));
    assert_eq!(visible.iter().map(|t| t.key.clone()).collect::<Vec<_>>(), vec![key("closing-1", 16)]);
}
