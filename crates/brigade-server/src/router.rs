//! Axum router construction for the session API.
//!
//! Assembles all routes (REST + `WebSocket`) into a single [`Router`]
//! with CORS middleware enabled for browser and kiosk clients.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::operator;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router.
///
/// See [`handlers`] and [`operator`] for the route tables; `GET /ws/sync`
/// carries the ephemeral sync tier.
///
/// CORS is configured to allow any origin. In production this should be
/// restricted.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // WebSocket
        .route("/ws/sync", get(ws::ws_sync))
        // Engine
        .route("/api/status", get(handlers::get_status))
        .route("/api/period", get(handlers::get_period))
        .route("/api/acted", get(handlers::has_acted))
        .route("/api/evidence/live", get(handlers::live_evidence))
        // Tasks
        .route("/api/tasks", get(handlers::list_tasks))
        .route("/api/tasks/day/{date}", get(handlers::list_tasks_for_date))
        .route("/api/tasks/{target}", get(handlers::get_task))
        .route("/api/tasks/{target}/start", post(handlers::start_task))
        .route("/api/tasks/{target}/submit", post(handlers::submit_task))
        .route("/api/tasks/{target}/complete", post(handlers::complete_task))
        .route("/api/tasks/{target}/decide", post(handlers::decide_task))
        // Periods and clock
        .route("/api/periods/{id}/close", post(handlers::close_period))
        .route(
            "/api/clock/offset",
            post(handlers::set_offset).delete(handlers::clear_offset),
        )
        // Durable tier
        .route("/api/shadow/{key}", get(handlers::read_shadow))
        .route("/api/schedule/{date}", get(handlers::read_schedule))
        // Operator
        .route("/api/operator/status", get(operator::status))
        .route("/api/operator/stop", post(operator::stop))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
