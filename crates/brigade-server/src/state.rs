//! Shared application state for the session API server.
//!
//! [`AppState`] holds the engine behind the same `tokio` mutex the runner
//! ticks, the sync bus, and a broadcast channel that carries every bus
//! message to connected `WebSocket` clients. The broadcast is fed by one
//! bus subscription owned by the state, so both locally published and
//! remotely applied messages reach the sockets.

use std::sync::Arc;

use brigade_core::engine::Engine;
use brigade_core::runner::RunControl;
use brigade_sync::{Subscription, SyncBus, SyncError};
use brigade_types::{SessionId, SyncMessage};
use tokio::sync::{Mutex, broadcast};

/// Default capacity of the broadcast channel for sync messages.
///
/// If a socket falls behind by more than this many messages it receives
/// a [`broadcast::error::RecvError::Lagged`] and skips to the newest
/// message; the client then re-fetches, as it would for any hint.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor.
pub struct AppState {
    /// The engine, shared with the runner.
    pub engine: Arc<Mutex<Engine>>,
    /// The engine's sync bus.
    pub bus: Arc<SyncBus>,
    /// Broadcast sender feeding `WebSocket` clients.
    pub tx: broadcast::Sender<SyncMessage>,
    /// Runner control (present when the engine loop is running).
    pub run_control: Option<Arc<RunControl>>,
    _subscription: Subscription,
}

impl AppState {
    /// Attach the API to an engine and start relaying its bus to the
    /// broadcast channel.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the bus refuses the relay subscription.
    pub fn new(
        engine: Arc<Mutex<Engine>>,
        bus: Arc<SyncBus>,
        capacity: usize,
    ) -> Result<Self, SyncError> {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let relay = tx.clone();
        let subscription = bus.subscribe_all(
            SessionId::new(),
            Arc::new(move |message: &SyncMessage| {
                // Err only means no socket is connected.
                let _ = relay.send(message.clone());
            }),
        )?;
        Ok(Self {
            engine,
            bus,
            tx,
            run_control: None,
            _subscription: subscription,
        })
    }

    /// Attach runner control for the operator endpoints.
    #[must_use]
    pub fn with_run_control(mut self, control: Arc<RunControl>) -> Self {
        self.run_control = Some(control);
        self
    }

    /// Subscribe to the sync broadcast.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncMessage> {
        self.tx.subscribe()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("sockets", &self.tx.receiver_count())
            .field("run_control", &self.run_control.is_some())
            .finish_non_exhaustive()
    }
}
