//! `WebSocket` transport for the ephemeral sync tier.
//!
//! Clients connect to `GET /ws/sync?session_id=<uuid>` and receive every
//! sync message as a JSON text frame, except messages sent by their own
//! session. Messages are hints: a client re-fetches over REST when one
//! arrives.
//!
//! Only messages sent while the socket is open are delivered. A client
//! that reconnects catches up from the durable tier
//! (`/api/shadow/{key}`, `/api/schedule/{date}`). Lagged messages are
//! skipped the same way.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use brigade_types::{SessionId, SyncMessage};
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::state::AppState;

/// Query parameters for `GET /ws/sync`.
#[derive(Debug, Default, Deserialize)]
pub struct SyncQuery {
    /// The client's session; its own messages are not echoed.
    pub session_id: Option<Uuid>,
}

/// Upgrade an HTTP request to a `WebSocket` and stream sync messages.
///
/// # Route
///
/// `GET /ws/sync`
pub async fn ws_sync(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<SyncQuery>,
) -> impl IntoResponse {
    let session = query.session_id.map(SessionId::from);
    ws.on_upgrade(move |socket| handle_ws(socket, state, session))
}

/// Whether a message should be sent to the socket of `session`.
pub fn delivers_to(message: &SyncMessage, session: Option<SessionId>) -> bool {
    session.is_none_or(|own| message.sender != own)
}

async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>, session: Option<SessionId>) {
    debug!(?session, "Sync socket connected");

    let mut rx = state.subscribe();

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(message) => {
                        if !delivers_to(&message, session) {
                            continue;
                        }
                        let json = match serde_json::to_string(&message) {
                            Ok(j) => j,
                            Err(e) => {
                                warn!("Failed to serialize sync message: {e}");
                                continue;
                            }
                        };
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            debug!("Sync socket disconnected (send failed)");
                            return;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!(skipped = n, "Sync socket lagged, skipping ahead");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        debug!("Sync broadcast closed, shutting down socket");
                        return;
                    }
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Sync socket disconnected");
                        return;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!("Sync socket disconnected (pong failed)");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("Sync socket error: {e}");
                        return;
                    }
                    // Clients act over REST; other frames are ignored.
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use brigade_types::{SyncPayload, TaskDefId, TaskKey};
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn own_messages_are_not_echoed() {
        let at = NaiveDate::from_ymd_opt(2026, 10, 15)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let sender = SessionId::new();
        let message = SyncMessage::new(
            sender,
            at,
            SyncPayload::TaskStarted {
                key: TaskKey::new(TaskDefId::from("opening-2"), at.date()),
            },
        );
        assert!(!delivers_to(&message, Some(sender)));
        assert!(delivers_to(&message, Some(SessionId::new())));
        assert!(delivers_to(&message, None));
    }
}
