//! NATS transport for the ephemeral sync tier across engine processes.
//!
//! Every message this process originates is wrapped in an [`Envelope`]
//! naming the process and published on one subject. Each process
//! subscribes to the same subject and applies foreign envelopes to its
//! local [`SyncBus`] with [`SyncBus::apply`], which never forwards, so a
//! message crosses the wire once.
//!
//! # Sync/Async Bridge
//!
//! [`Forwarder::forward`] is synchronous and runs under the engine lock.
//! [`NatsForwarder`] only queues onto an unbounded channel; a spawned task
//! drains the queue into NATS.

use std::sync::Arc;

use brigade_sync::{Forwarder, SyncBus, SyncError};
use brigade_types::SyncMessage;
use futures::StreamExt as _;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Wire format on the sync subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// The process that originated the message.
    pub origin: Uuid,
    /// The message itself.
    pub message: SyncMessage,
}

/// The message inside `envelope`, unless this process sent it.
pub fn foreign_message(envelope: Envelope, own_origin: Uuid) -> Option<SyncMessage> {
    (envelope.origin != own_origin).then_some(envelope.message)
}

/// Queues originated messages for the publisher task.
#[derive(Debug)]
pub struct NatsForwarder {
    origin: Uuid,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl NatsForwarder {
    /// Create a forwarder and the receiving half its publisher drains.
    pub fn new(origin: Uuid) -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { origin, tx }, rx)
    }
}

impl Forwarder for NatsForwarder {
    fn forward(&self, message: &SyncMessage) -> Result<(), SyncError> {
        self.tx
            .send(Envelope {
                origin: self.origin,
                message: message.clone(),
            })
            .map_err(|_| SyncError::DeliveryFailure("NATS publisher stopped".to_owned()))
    }
}

/// Connect the bus to NATS in both directions.
///
/// Returns the publisher and subscriber tasks. Both run until the
/// connection or the bus goes away.
///
/// # Errors
///
/// Returns [`SyncError::DeliveryFailure`] if the subscription cannot be
/// created.
pub async fn attach(
    client: async_nats::Client,
    subject: String,
    bus: &Arc<SyncBus>,
) -> Result<(JoinHandle<()>, JoinHandle<()>), SyncError> {
    let origin = Uuid::now_v7();
    let subscriber = client
        .subscribe(subject.clone())
        .await
        .map_err(|e| SyncError::DeliveryFailure(format!("failed to subscribe to {subject}: {e}")))?;

    let (forwarder, rx) = NatsForwarder::new(origin);
    bus.add_forwarder(Arc::new(forwarder));

    let publisher = tokio::spawn(publish_loop(client, subject.clone(), rx));
    let inbound = tokio::spawn(apply_loop(subscriber, Arc::clone(bus), origin));
    info!(subject = %subject, %origin, "Sync bus bridged to NATS");
    Ok((publisher, inbound))
}

async fn publish_loop(
    client: async_nats::Client,
    subject: String,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
) {
    while let Some(envelope) = rx.recv().await {
        let payload = match serde_json::to_vec(&envelope) {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to serialize sync envelope: {e}");
                continue;
            }
        };
        if let Err(e) = client.publish(subject.clone(), payload.into()).await {
            warn!(kind = ?envelope.message.kind(), "Failed to publish sync message: {e}");
            continue;
        }
        debug!(id = %envelope.message.id, "Forwarded sync message");
    }
    debug!("Sync publisher stopped");
}

async fn apply_loop(mut subscriber: async_nats::Subscriber, bus: Arc<SyncBus>, origin: Uuid) {
    while let Some(msg) = subscriber.next().await {
        match serde_json::from_slice::<Envelope>(&msg.payload) {
            Ok(envelope) => {
                if let Some(message) = foreign_message(envelope, origin) {
                    bus.apply(&message);
                }
            }
            Err(e) => warn!(error = %e, "Failed to deserialize sync envelope"),
        }
    }
    debug!("Sync subscription closed");
}
