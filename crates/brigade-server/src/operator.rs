//! Operator endpoints for the engine loop.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/api/operator/status` | Loop state |
//! | `POST` | `/api/operator/stop` | Stop after the current tick |

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use brigade_core::runner::RunControl;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

/// Loop state returned by every operator endpoint.
#[derive(Debug, Serialize)]
pub struct LoopStatus {
    /// Whether a stop was requested.
    pub stop_requested: bool,
    /// Poll interval.
    pub interval_ms: u64,
    /// Ticks run by this engine.
    pub tick: u64,
}

fn control(state: &AppState) -> Result<&Arc<RunControl>, ApiError> {
    state.run_control.as_ref().ok_or(ApiError::NoRunControl)
}

async fn loop_status(state: &AppState, control: &RunControl) -> LoopStatus {
    LoopStatus {
        stop_requested: control.is_stop_requested(),
        interval_ms: control.interval_ms(),
        tick: state.engine.lock().await.tick_count(),
    }
}

/// Current loop state.
pub async fn status(State(state): State<Arc<AppState>>) -> Result<Json<LoopStatus>, ApiError> {
    let control = control(&state)?;
    Ok(Json(loop_status(&state, control).await))
}

/// Stop the loop after the current tick; a final snapshot is written.
pub async fn stop(State(state): State<Arc<AppState>>) -> Result<Json<LoopStatus>, ApiError> {
    let control = control(&state)?;
    control.request_stop();
    Ok(Json(loop_status(&state, control).await))
}
