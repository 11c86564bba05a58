//! Integration tests for the session API.
//!
//! Tests use Axum's `Router` directly via `tower::ServiceExt` without
//! starting a TCP server. The engine runs against a manual wall clock
//! set to 08:05 on a service day, so the opening period is active.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use brigade_core::clock::{ClockSource, ManualClock};
use brigade_core::collaborators::RecordingNotifier;
use brigade_core::config::{ClockConfig, EngineConfig};
use brigade_core::engine::Engine;
use brigade_core::runner::RunControl;
use brigade_server::router::build_router;
use brigade_server::state::{AppState, DEFAULT_BROADCAST_CAPACITY};
use brigade_sync::SyncBus;
use brigade_types::{SyncMessage, SyncPayload};
use chrono::NaiveDate;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tower::ServiceExt;

const TASK: &str = "opening-1@2026-10-15";

fn make_state() -> Arc<AppState> {
    let start = NaiveDate::from_ymd_opt(2026, 10, 15)
        .unwrap()
        .and_hms_opt(8, 5, 0)
        .unwrap();
    let wall = ManualClock::new(start);
    let bus = Arc::new(SyncBus::in_memory());
    let mut engine = Engine::new(
        &EngineConfig::default(),
        ClockSource::new(Arc::new(wall), &ClockConfig::default()),
        Arc::clone(&bus),
        Arc::new(RecordingNotifier::new()),
    )
    .unwrap();
    engine.tick();
    Arc::new(
        AppState::new(
            Arc::new(Mutex::new(engine)),
            bus,
            DEFAULT_BROADCAST_CAPACITY,
        )
        .unwrap(),
    )
}

fn app(state: &Arc<AppState>) -> Router {
    build_router(Arc::clone(state))
}

fn get(uri: &str, as_user: Option<(&str, &str)>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some((user, role)) = as_user {
        builder = builder.header("x-user-id", user).header("x-role", role);
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, as_user: Option<(&str, &str)>, body: &Value) -> Request<Body> {
    let mut builder = Request::post(uri).header("content-type", "application/json");
    if let Some((user, role)) = as_user {
        builder = builder.header("x-user-id", user).header("x-role", role);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_to_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

const KITCHEN: Option<(&str, &str)> = Some(("kim", "kitchen"));
const MANAGER: Option<(&str, &str)> = Some(("morgan", "manager"));

async fn submit_opening_task(state: &Arc<AppState>) -> Value {
    let response = app(state)
        .oneshot(post(
            &format!("/api/tasks/{TASK}/submit"),
            KITCHEN,
            &json!({ "evidence": [] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_to_json(response).await
}

#[tokio::test]
async fn status_reports_tick_and_active_period() {
    let state = make_state();
    let response = app(&state).oneshot(get("/api/status", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_to_json(response).await;
    assert_eq!(json["tick"], 1);
    assert_eq!(json["active_period"], "opening");
    assert_eq!(json["unsynced_writes"], 0);
}

#[tokio::test]
async fn current_period_is_opening() {
    let state = make_state();
    let response = app(&state).oneshot(get("/api/period", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response).await;
    assert_eq!(json["id"], "opening");
}

#[tokio::test]
async fn actions_require_session_headers() {
    let state = make_state();
    let response = app(&state).oneshot(get("/api/tasks", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = body_to_json(response).await;
    assert_eq!(json["status"], 401);
}

#[tokio::test]
async fn visible_tasks_follow_the_role() {
    let state = make_state();

    let kitchen = body_to_json(app(&state).oneshot(get("/api/tasks", KITCHEN)).await.unwrap()).await;
    let kitchen_ids: Vec<&str> = kitchen
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["key"]["def_id"].as_str().unwrap())
        .collect();
    assert_eq!(kitchen_ids, vec!["opening-1"]);

    let manager = body_to_json(app(&state).oneshot(get("/api/tasks", MANAGER)).await.unwrap()).await;
    assert_eq!(manager.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn submit_then_approve_completes_the_task() {
    let state = make_state();

    let submitted = submit_opening_task(&state).await;
    assert_eq!(submitted["coalesced"], false);
    assert_eq!(submitted["task"]["status"], "in_progress");
    assert_eq!(submitted["task"]["review_status"], "in_review");

    let forbidden = app(&state)
        .oneshot(post(
            &format!("/api/tasks/{TASK}/decide"),
            KITCHEN,
            &json!({ "verdict": "approve" }),
        ))
        .await
        .unwrap();
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let approved = app(&state)
        .oneshot(post(
            &format!("/api/tasks/{TASK}/decide"),
            MANAGER,
            &json!({ "verdict": "approve" }),
        ))
        .await
        .unwrap();
    assert_eq!(approved.status(), StatusCode::OK);
    let json = body_to_json(approved).await;
    assert_eq!(json["status"], "completed");
    assert_eq!(json["review_status"], "approved");

    let acted = body_to_json(
        app(&state)
            .oneshot(get("/api/acted?action=approve", MANAGER))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(acted["acted"], true);
}

#[tokio::test]
async fn resubmitting_the_same_evidence_is_coalesced() {
    let state = make_state();
    submit_opening_task(&state).await;
    let second = submit_opening_task(&state).await;
    assert_eq!(second["coalesced"], true);
    assert_eq!(second["task"]["submission_count"], 1);
}

#[tokio::test]
async fn rejection_needs_a_reason() {
    let state = make_state();
    submit_opening_task(&state).await;

    let response = app(&state)
        .oneshot(post(
            &format!("/api/tasks/{TASK}/decide"),
            MANAGER,
            &json!({ "verdict": "reject", "reason": "  " }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deciding_before_submit_conflicts() {
    let state = make_state();
    let response = app(&state)
        .oneshot(post(
            &format!("/api/tasks/{TASK}/decide"),
            MANAGER,
            &json!({ "verdict": "approve" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn task_targets_are_validated() {
    let state = make_state();

    let malformed = app(&state)
        .oneshot(get("/api/tasks/opening-1", None))
        .await
        .unwrap();
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

    let unknown = app(&state)
        .oneshot(get("/api/tasks/opening-9@2026-10-15", None))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let known = app(&state).oneshot(get(&format!("/api/tasks/{TASK}"), None)).await.unwrap();
    assert_eq!(known.status(), StatusCode::OK);
}

#[tokio::test]
async fn clock_offset_is_validated_and_shared() {
    let state = make_state();

    let negative = app(&state)
        .oneshot(post("/api/clock/offset", None, &json!({ "offset_secs": -60 })))
        .await
        .unwrap();
    assert_eq!(negative.status(), StatusCode::BAD_REQUEST);

    let forward = app(&state)
        .oneshot(post("/api/clock/offset", None, &json!({ "offset_secs": 3600 })))
        .await
        .unwrap();
    assert_eq!(forward.status(), StatusCode::OK);
    assert_eq!(body_to_json(forward).await["offset_secs"], 3600);

    let slot = app(&state)
        .oneshot(get("/api/shadow/clock:offset", None))
        .await
        .unwrap();
    assert_eq!(slot.status(), StatusCode::OK);
    let json = body_to_json(slot).await;
    assert_eq!(json["payload"]["type"], "clock_offset");
    assert_eq!(json["payload"]["offset_secs"], 3600);

    let cleared = app(&state)
        .oneshot(
            Request::delete("/api/clock/offset")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(cleared.status(), StatusCode::OK);
    assert_eq!(body_to_json(cleared).await["offset_secs"], Value::Null);
}

#[tokio::test]
async fn schedule_journal_replays_the_day() {
    let state = make_state();
    let response = app(&state)
        .oneshot(get("/api/schedule/2026-10-15", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_to_json(response).await;
    let first = &json.as_array().unwrap()[0];
    assert_eq!(first["payload"]["type"], "period_entered");
    assert_eq!(first["payload"]["period"], "opening");
}

#[tokio::test]
async fn missing_shadow_slot_is_not_found() {
    let state = make_state();
    let response = app(&state)
        .oneshot(get("/api/shadow/task:closing-1:2026-10-15", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn operator_endpoints_need_run_control() {
    let state = make_state();
    let response = app(&state)
        .oneshot(get("/api/operator/status", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn operator_can_stop_the_loop() {
    let base = make_state();
    let control = Arc::new(RunControl::new(1000));
    let state = Arc::new(
        AppState::new(
            Arc::clone(&base.engine),
            Arc::clone(&base.bus),
            DEFAULT_BROADCAST_CAPACITY,
        )
        .unwrap()
        .with_run_control(Arc::clone(&control)),
    );

    let running = app(&state)
        .oneshot(get("/api/operator/status", None))
        .await
        .unwrap();
    let json = body_to_json(running).await;
    assert_eq!(json["stop_requested"], false);
    assert_eq!(json["interval_ms"], 1000);
    assert_eq!(json["tick"], 1);

    let stopped = app(&state)
        .oneshot(post("/api/operator/stop", None, &json!({})))
        .await
        .unwrap();
    assert_eq!(stopped.status(), StatusCode::OK);
    assert_eq!(body_to_json(stopped).await["stop_requested"], true);
    assert!(control.is_stop_requested());

    let retired = app(&state)
        .oneshot(post("/api/operator/speed", None, &json!({ "interval_ms": 5000 })))
        .await
        .unwrap();
    assert_eq!(retired.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn actions_are_relayed_to_sockets() {
    let state = make_state();
    let mut rx = state.subscribe();

    submit_opening_task(&state).await;

    let message: SyncMessage = rx.try_recv().unwrap();
    assert!(matches!(
        message.payload,
        SyncPayload::TaskSubmitted { submission: 1, .. }
    ));
}

#[tokio::test]
async fn manual_close_is_for_approvers_once_per_occurrence() {
    let state = make_state();

    let forbidden = app(&state)
        .oneshot(post("/api/periods/opening/close", KITCHEN, &json!({})))
        .await
        .unwrap();
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let closed = app(&state)
        .oneshot(post("/api/periods/opening/close", MANAGER, &json!({})))
        .await
        .unwrap();
    assert_eq!(closed.status(), StatusCode::OK);
    let json = body_to_json(closed).await;
    assert_eq!(json["action"], "manual_close");
    assert_eq!(json["target_id"], "opening@2026-10-15");

    let again = app(&state)
        .oneshot(post("/api/periods/opening/close", MANAGER, &json!({})))
        .await
        .unwrap();
    assert_eq!(again.status(), StatusCode::CONFLICT);

    let period = body_to_json(app(&state).oneshot(get("/api/period", None)).await.unwrap()).await;
    assert_eq!(period, Value::Null);
}

#[tokio::test]
async fn submitted_evidence_is_listed_as_live() {
    let state = make_state();
    let evidence = json!({ "kind": "photo", "url": "https://media.example/walk-in.jpg", "value": null });
    let response = app(&state)
        .oneshot(post(
            &format!("/api/tasks/{TASK}/submit"),
            KITCHEN,
            &json!({ "evidence": [evidence.clone()] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let live = body_to_json(
        app(&state)
            .oneshot(get("/api/evidence/live", None))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(live, json!([evidence]));
}
