//! The two-tier sync bus.
//!
//! [`SyncBus::publish`] is the only path that originates a message: it
//! mirrors the message into the shadow store, fans it out on the
//! ephemeral channel, and hands it to outbound [`Forwarder`]s (other
//! processes). [`SyncBus::apply`] is the inbound path for messages that
//! originated elsewhere: shadow + local fan-out, never forwarded. Keeping
//! the two apart is what prevents rebroadcast loops between processes.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use brigade_types::{MessageId, SessionId, SyncMessage, SyncMessageType};
use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::channel::{
    EphemeralChannel, Handler, LocalChannel, SubscriberFilter, Subscription,
};
use crate::error::SyncError;
use crate::shadow::{MemoryShadow, ShadowEntry, ShadowStore};

/// How many recent message ids are remembered for duplicate suppression.
const SEEN_CAPACITY: usize = 1024;

/// Outbound transport that carries originated messages to other processes.
pub trait Forwarder: Send + Sync {
    /// Forward one message. Failures are logged by the bus.
    fn forward(&self, message: &SyncMessage) -> Result<(), SyncError>;
}

/// What happened to one published or applied message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishReport {
    /// Local handlers invoked by the ephemeral tier.
    pub delivered: usize,
    /// Whether the shadow write succeeded.
    pub shadowed: bool,
    /// Forwarders that accepted the message.
    pub forwarded: usize,
    /// The message id had already been seen and was dropped.
    pub duplicate: bool,
}

/// Bounded memory of recently handled message ids.
#[derive(Debug, Default)]
struct SeenIds {
    order: VecDeque<MessageId>,
    ids: BTreeSet<MessageId>,
}

impl SeenIds {
    /// Record an id; returns `false` if it was already present.
    fn insert(&mut self, id: MessageId) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > SEEN_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

/// Pub/sub fan-out of change events across sessions.
pub struct SyncBus {
    channel: Arc<dyn EphemeralChannel>,
    shadow: Arc<dyn ShadowStore>,
    forwarders: RwLock<Vec<Arc<dyn Forwarder>>>,
    seen: Mutex<SeenIds>,
}

impl SyncBus {
    /// Assemble a bus from a transport and a shadow store.
    pub fn new(channel: Arc<dyn EphemeralChannel>, shadow: Arc<dyn ShadowStore>) -> Self {
        Self {
            channel,
            shadow,
            forwarders: RwLock::new(Vec::new()),
            seen: Mutex::new(SeenIds::default()),
        }
    }

    /// A bus backed by a [`LocalChannel`] and a [`MemoryShadow`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(LocalChannel::new()), Arc::new(MemoryShadow::new()))
    }

    /// The shadow store backing the durable tier.
    pub fn shadow(&self) -> &Arc<dyn ShadowStore> {
        &self.shadow
    }

    /// Drop shadow slots dated before `cutoff`. Failures are logged.
    pub fn prune_shadow(&self, cutoff: NaiveDate) -> usize {
        match self.shadow.prune_before(cutoff) {
            Ok(removed) => {
                if removed > 0 {
                    debug!(removed, %cutoff, "Pruned shadow slots");
                }
                removed
            }
            Err(e) => {
                warn!(%cutoff, "Shadow prune failed: {e}");
                0
            }
        }
    }

    /// Attach an outbound forwarder.
    pub fn add_forwarder(&self, forwarder: Arc<dyn Forwarder>) {
        if let Ok(mut forwarders) = self.forwarders.write() {
            forwarders.push(forwarder);
        }
    }

    /// Originate a message: shadow, local fan-out, then forwarders.
    ///
    /// Best effort on every tier; failures are logged and reported, never
    /// returned.
    pub fn publish(&self, message: &SyncMessage) -> PublishReport {
        let mut report = self.fan_in(message);
        if report.duplicate {
            return report;
        }

        let forwarders: Vec<Arc<dyn Forwarder>> = self
            .forwarders
            .read()
            .map(|list| list.clone())
            .unwrap_or_default();
        for forwarder in &forwarders {
            match forwarder.forward(message) {
                Ok(()) => report.forwarded = report.forwarded.saturating_add(1),
                Err(e) => warn!(kind = ?message.kind(), "Forwarding failed: {e}"),
            }
        }
        report
    }

    /// Apply a message that originated in another process. Never forwards.
    pub fn apply(&self, message: &SyncMessage) -> PublishReport {
        self.fan_in(message)
    }

    /// Shadow write and local delivery shared by both paths.
    fn fan_in(&self, message: &SyncMessage) -> PublishReport {
        let fresh = self
            .seen
            .lock()
            .map(|mut seen| seen.insert(message.id))
            .unwrap_or(true);
        if !fresh {
            debug!(id = %message.id, "Dropping already-seen sync message");
            return PublishReport {
                duplicate: true,
                ..PublishReport::default()
            };
        }

        let shadowed = match self.shadow.write(ShadowEntry::of(message.clone())) {
            Ok(()) => true,
            Err(e) => {
                warn!(key = message.shadow_key(), "Shadow write failed: {e}");
                false
            }
        };

        let delivered = match self.channel.deliver(message) {
            Ok(n) => n,
            Err(e) => {
                // Degrades to shadow catch-up; not user-visible.
                debug!(kind = ?message.kind(), "Ephemeral delivery unavailable: {e}");
                0
            }
        };

        PublishReport {
            delivered,
            shadowed,
            forwarded: 0,
            duplicate: false,
        }
    }

    /// Subscribe a session to one message type.
    pub fn subscribe(
        &self,
        session: SessionId,
        kind: SyncMessageType,
        handler: Handler,
    ) -> Result<Subscription, SyncError> {
        self.register(SubscriberFilter {
            session,
            kind: Some(kind),
        }, handler)
    }

    /// Subscribe a session to every message type.
    pub fn subscribe_all(
        &self,
        session: SessionId,
        handler: Handler,
    ) -> Result<Subscription, SyncError> {
        self.register(SubscriberFilter { session, kind: None }, handler)
    }

    fn register(
        &self,
        filter: SubscriberFilter,
        handler: Handler,
    ) -> Result<Subscription, SyncError> {
        let id = self.channel.register(filter, handler)?;
        Ok(Subscription::new(id, &self.channel))
    }

    /// Read the last message mirrored into a slot.
    pub fn read_shadow(&self, key: &str) -> Result<Option<SyncMessage>, SyncError> {
        Ok(self.shadow.read(key)?.map(|entry| entry.message))
    }

    /// Read every message under a slot prefix, in key order.
    pub fn catch_up(&self, prefix: &str) -> Result<Vec<SyncMessage>, SyncError> {
        Ok(self
            .shadow
            .scan(prefix)?
            .into_iter()
            .map(|entry| entry.message)
            .collect())
    }
}

impl core::fmt::Debug for SyncBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SyncBus").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use brigade_types::{SyncPayload, TaskDefId, TaskKey};
    use chrono::NaiveDate;

    use super::*;

    struct CountingForwarder(AtomicUsize);

    impl Forwarder for CountingForwarder {
        fn forward(&self, _message: &SyncMessage) -> Result<(), SyncError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn rejected(sender: SessionId) -> SyncMessage {
        let date = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        SyncMessage::new(
            sender,
            date.and_hms_opt(10, 0, 0).unwrap(),
            SyncPayload::TaskRejected {
                key: TaskKey::new(TaskDefId::from("opening-1"), date),
                reason: "photo is blurry".to_owned(),
                submitter: None,
            },
        )
    }

    #[test]
    fn publish_without_listeners_still_shadows() {
        let bus = SyncBus::in_memory();
        let msg = rejected(SessionId::new());
        let report = bus.publish(&msg);
        assert_eq!(report.delivered, 0);
        assert!(report.shadowed);
        assert_eq!(
            bus.read_shadow("task:opening-1:2026-10-15").unwrap(),
            Some(msg)
        );
    }

    #[test]
    fn apply_never_forwards() {
        let bus = SyncBus::in_memory();
        let forwarder = Arc::new(CountingForwarder(AtomicUsize::new(0)));
        bus.add_forwarder(Arc::clone(&forwarder) as Arc<dyn Forwarder>);

        bus.publish(&rejected(SessionId::new()));
        bus.apply(&rejected(SessionId::new()));
        assert_eq!(forwarder.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn echoed_message_is_dropped() {
        let bus = SyncBus::in_memory();
        let received = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&received);
        let _sub = bus
            .subscribe_all(
                SessionId::new(),
                Arc::new(move |_msg: &SyncMessage| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        let msg = rejected(SessionId::new());
        bus.publish(&msg);
        let echo = bus.apply(&msg);
        assert!(echo.duplicate);
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closed_channel_degrades_to_shadow() {
        let channel = Arc::new(LocalChannel::new());
        let bus = SyncBus::new(
            Arc::clone(&channel) as Arc<dyn EphemeralChannel>,
            Arc::new(MemoryShadow::new()),
        );
        channel.close();
        let report = bus.publish(&rejected(SessionId::new()));
        assert_eq!(report.delivered, 0);
        assert!(report.shadowed);
    }
}
