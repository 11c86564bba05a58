//! Session API server for the Brigade engine.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **`WebSocket` endpoint** (`/ws/sync`) carrying the ephemeral sync
//!   tier to open client sessions via [`tokio::sync::broadcast`]
//! - **REST endpoints** for the checklist: current period, tasks by role,
//!   start / submit / complete / decide, manual period close, and the
//!   business-clock offset
//! - **Durable tier reads** (`/api/shadow/{key}`, `/api/schedule/{date}`)
//!   so a late or reconnecting session catches up
//! - **Operator endpoints** reporting on and stopping the engine loop
//!
//! # Architecture
//!
//! The server shares the engine with the runner behind one
//! [`tokio::sync::Mutex`]. Every action names its caller through session
//! headers (see [`session`]); there is no ambient user.

pub mod error;
pub mod handlers;
pub mod operator;
pub mod router;
pub mod server;
pub mod session;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use error::ApiError;
pub use router::build_router;
pub use server::{ServerConfig, ServerError, start_server};
pub use state::AppState;
