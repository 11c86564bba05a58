//! REST endpoint handlers for client sessions.
//!
//! Reads and actions lock the shared engine for the duration of the call;
//! actions publish their sync hints while the lock is held, so a hint is
//! never observed before the state it announces.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/api/status` | Engine status and unsynced indicator |
//! | `GET` | `/api/period` | Active period, `null` between periods |
//! | `GET` | `/api/tasks` | Tasks visible to the caller's role now |
//! | `GET` | `/api/tasks/day/{date}` | Every instance of a date |
//! | `GET` | `/api/tasks/{target}` | One instance (`def@date`) |
//! | `POST` | `/api/tasks/{target}/start` | Begin work |
//! | `POST` | `/api/tasks/{target}/submit` | Submit evidence for review |
//! | `POST` | `/api/tasks/{target}/complete` | Complete a task without review |
//! | `POST` | `/api/tasks/{target}/decide` | Approve or reject |
//! | `GET` | `/api/acted` | Whether the caller did an action today |
//! | `POST` | `/api/periods/{id}/close` | Manually close the active period |
//! | `POST` | `/api/clock/offset` | Set the business-clock offset |
//! | `DELETE` | `/api/clock/offset` | Clear the offset |
//! | `GET` | `/api/evidence/live` | Evidence references still in use |
//! | `GET` | `/api/shadow/{key}` | Read one shadow slot |
//! | `GET` | `/api/schedule/{date}` | Replay a day's schedule journal |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use brigade_core::engine::EngineStatus;
use brigade_core::session::TaskSource;
use brigade_core::tasks::SubmitOutcome;
use brigade_types::{
    EvidenceRef, Period, PeriodId, ReviewAction, ReviewTransition, SyncMessage, TaskInstance,
    TaskKey, Verdict, schedule_prefix,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::session::Caller;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Request body carrying evidence references.
#[derive(Debug, Default, Deserialize)]
pub struct EvidenceBody {
    /// References returned by the media service.
    #[serde(default)]
    pub evidence: Vec<EvidenceRef>,
}

/// Response to a submit.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    /// `true` when the submit matched the one under review and changed
    /// nothing.
    pub coalesced: bool,
    /// The instance after the submit.
    pub task: TaskInstance,
}

/// Query parameters for `GET /api/acted`.
#[derive(Debug, Deserialize)]
pub struct ActedQuery {
    /// The action to look for.
    pub action: ReviewAction,
    /// Restrict to one target (`def@date` or `period@date`).
    pub target: Option<String>,
}

/// Response to `GET /api/acted`.
#[derive(Debug, Serialize)]
pub struct ActedResponse {
    /// Whether the caller performed the action today.
    pub acted: bool,
}

/// Request body for `POST /api/clock/offset`.
#[derive(Debug, Deserialize)]
pub struct OffsetBody {
    /// Seconds added to real time.
    pub offset_secs: i64,
}

/// Current clock offset.
#[derive(Debug, Serialize)]
pub struct OffsetResponse {
    /// The offset now in effect, `null` when real time is used.
    pub offset_secs: Option<i64>,
}

fn parse_target(target: &str) -> Result<TaskKey, ApiError> {
    TaskKey::from_target_id(target)
        .ok_or_else(|| ApiError::InvalidRequest(format!("malformed task target {target:?}")))
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Engine status, including pending and unsynced write counts.
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<EngineStatus> {
    Json(state.engine.lock().await.status())
}

/// The active period.
pub async fn get_period(State(state): State<Arc<AppState>>) -> Json<Option<Period>> {
    Json(state.engine.lock().await.current_period())
}

/// Tasks of the current period visible to the caller's role.
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
) -> Json<Vec<TaskInstance>> {
    Json(state.engine.lock().await.visible_tasks(&ctx.role))
}

/// Every instance of `date`.
pub async fn list_tasks_for_date(
    State(state): State<Arc<AppState>>,
    Path(date): Path<NaiveDate>,
) -> Json<Vec<TaskInstance>> {
    Json(state.engine.lock().await.tasks_for_date(date))
}

/// One instance.
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(target): Path<String>,
) -> Result<Json<TaskInstance>, ApiError> {
    let key = parse_target(&target)?;
    state
        .engine
        .lock()
        .await
        .task(&key)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("task {key}")))
}

/// Evidence references held by any instance; blobs not listed may be
/// deleted by the media service.
pub async fn live_evidence(State(state): State<Arc<AppState>>) -> Json<Vec<EvidenceRef>> {
    Json(state.engine.lock().await.live_evidence_refs())
}

/// Whether the caller performed `action` today, optionally on one target.
pub async fn has_acted(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    Query(query): Query<ActedQuery>,
) -> Json<ActedResponse> {
    let engine = state.engine.lock().await;
    let today = engine.now().date();
    let controller = engine.controller();
    let acted = match &query.target {
        Some(target) => controller.has_acted_today_on(&ctx.user_id, query.action, target, today),
        None => controller.has_acted_today(&ctx.user_id, query.action, today),
    };
    Json(ActedResponse { acted })
}

// ---------------------------------------------------------------------------
// Task actions
// ---------------------------------------------------------------------------

/// Begin work on a task.
pub async fn start_task(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    Path(target): Path<String>,
) -> Result<Json<TaskInstance>, ApiError> {
    let key = parse_target(&target)?;
    let task = state.engine.lock().await.start(&ctx, &key)?;
    Ok(Json(task))
}

/// Submit evidence for review.
pub async fn submit_task(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    Path(target): Path<String>,
    Json(body): Json<EvidenceBody>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let key = parse_target(&target)?;
    let outcome = state
        .engine
        .lock()
        .await
        .request_review(&ctx, &key, body.evidence)?;
    let response = match outcome {
        SubmitOutcome::Submitted(change) => SubmitResponse {
            coalesced: false,
            task: change.instance,
        },
        SubmitOutcome::Coalesced(task) => SubmitResponse {
            coalesced: true,
            task,
        },
    };
    Ok(Json(response))
}

/// Complete a task that has no review.
pub async fn complete_task(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    Path(target): Path<String>,
    Json(body): Json<EvidenceBody>,
) -> Result<Json<TaskInstance>, ApiError> {
    let key = parse_target(&target)?;
    let task = state
        .engine
        .lock()
        .await
        .complete(&ctx, &key, body.evidence)?;
    Ok(Json(task))
}

/// Approve or reject the submission under review.
pub async fn decide_task(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    Path(target): Path<String>,
    Json(verdict): Json<Verdict>,
) -> Result<Json<TaskInstance>, ApiError> {
    let key = parse_target(&target)?;
    let task = state.engine.lock().await.decide(&ctx, &key, &verdict)?;
    Ok(Json(task))
}

// ---------------------------------------------------------------------------
// Periods and clock
// ---------------------------------------------------------------------------

/// Manually close the active period for the rest of its occurrence.
pub async fn close_period(
    State(state): State<Arc<AppState>>,
    Caller(ctx): Caller,
    Path(period): Path<String>,
) -> Result<Json<ReviewTransition>, ApiError> {
    let period = PeriodId::from(period);
    let entry = state.engine.lock().await.manual_close(&ctx, &period)?;
    Ok(Json(entry))
}

/// Set the business-clock offset and share it with every engine.
pub async fn set_offset(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OffsetBody>,
) -> Result<Json<OffsetResponse>, ApiError> {
    let offset_secs = state
        .engine
        .lock()
        .await
        .set_clock_offset(Some(body.offset_secs))?;
    Ok(Json(OffsetResponse { offset_secs }))
}

/// Return to real time.
pub async fn clear_offset(
    State(state): State<Arc<AppState>>,
) -> Result<Json<OffsetResponse>, ApiError> {
    let offset_secs = state.engine.lock().await.set_clock_offset(None)?;
    Ok(Json(OffsetResponse { offset_secs }))
}

// ---------------------------------------------------------------------------
// Durable tier
// ---------------------------------------------------------------------------

/// The last message written to one shadow slot.
pub async fn read_shadow(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<SyncMessage>, ApiError> {
    state
        .bus
        .read_shadow(&key)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("shadow slot {key}")))
}

/// The schedule journal of `date`, in order.
pub async fn read_schedule(
    State(state): State<Arc<AppState>>,
    Path(date): Path<NaiveDate>,
) -> Result<Json<Vec<SyncMessage>>, ApiError> {
    Ok(Json(state.bus.catch_up(&schedule_prefix(date))?))
}
