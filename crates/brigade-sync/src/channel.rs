//! Ephemeral tier: low-latency fan-out to currently open sessions.
//!
//! A message delivered through an [`EphemeralChannel`] reaches only the
//! subscribers registered at send time. Nothing is buffered for sessions
//! that open later; they catch up from the shadow store instead.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use brigade_types::{SessionId, SyncMessage, SyncMessageType};
use tracing::debug;

use crate::error::SyncError;

/// Callback invoked for every delivered message.
///
/// Handlers run on the publishing thread and must not block; they should
/// record an invalidation and return.
pub type Handler = Arc<dyn Fn(&SyncMessage) + Send + Sync>;

/// Identifier of a registered subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

/// Which messages a subscriber wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberFilter {
    /// The subscribing session. Messages it sent are never delivered back.
    pub session: SessionId,
    /// Restrict delivery to one message type (`None` = all types).
    pub kind: Option<SyncMessageType>,
}

impl SubscriberFilter {
    /// Whether a message should reach this subscriber.
    pub fn accepts(&self, message: &SyncMessage) -> bool {
        message.sender != self.session && self.kind.is_none_or(|kind| kind == message.kind())
    }
}

/// Transport for the ephemeral tier.
///
/// The in-process [`LocalChannel`] is the default; other transports
/// (cross-process brokers, `WebSocket` hubs) plug in behind this trait.
pub trait EphemeralChannel: Send + Sync {
    /// Deliver a message to every matching subscriber. Returns how many
    /// handlers were invoked.
    fn deliver(&self, message: &SyncMessage) -> Result<usize, SyncError>;

    /// Register a handler.
    fn register(&self, filter: SubscriberFilter, handler: Handler)
    -> Result<SubscriptionId, SyncError>;

    /// Remove a handler. Unknown ids are ignored.
    fn unregister(&self, id: SubscriptionId);
}

struct Subscriber {
    filter: SubscriberFilter,
    handler: Handler,
}

/// In-process ephemeral channel backed by a handler registry.
pub struct LocalChannel {
    subscribers: Mutex<BTreeMap<SubscriptionId, Subscriber>>,
    next_id: AtomicU64,
    open: AtomicBool,
}

impl LocalChannel {
    /// Create an open channel with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            open: AtomicBool::new(true),
        }
    }

    /// Take the channel down; deliveries fail until [`reopen`](Self::reopen).
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Bring the channel back up.
    pub fn reopen(&self) {
        self.open.store(true, Ordering::Release);
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map_or(0, |subs| subs.len())
    }
}

impl Default for LocalChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl EphemeralChannel for LocalChannel {
    fn deliver(&self, message: &SyncMessage) -> Result<usize, SyncError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(SyncError::DeliveryFailure(
                "local channel is closed".to_owned(),
            ));
        }

        // Collect handlers first so a handler may (un)subscribe without
        // deadlocking on the registry.
        let handlers: Vec<Handler> = {
            let subs = self
                .subscribers
                .lock()
                .map_err(|_poisoned| SyncError::Poisoned("local channel registry"))?;
            subs.values()
                .filter(|sub| sub.filter.accepts(message))
                .map(|sub| Arc::clone(&sub.handler))
                .collect()
        };

        for handler in &handlers {
            handler(message);
        }

        debug!(
            kind = ?message.kind(),
            delivered = handlers.len(),
            "Ephemeral delivery"
        );
        Ok(handlers.len())
    }

    fn register(
        &self,
        filter: SubscriberFilter,
        handler: Handler,
    ) -> Result<SubscriptionId, SyncError> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::AcqRel));
        self.subscribers
            .lock()
            .map_err(|_poisoned| SyncError::Poisoned("local channel registry"))?
            .insert(id, Subscriber { filter, handler });
        Ok(id)
    }

    fn unregister(&self, id: SubscriptionId) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.remove(&id);
        }
    }
}

/// Handle to a registered subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriptionId,
    channel: Weak<dyn EphemeralChannel>,
}

impl Subscription {
    /// Wrap a registered id.
    pub fn new(id: SubscriptionId, channel: &Arc<dyn EphemeralChannel>) -> Self {
        Self {
            id,
            channel: Arc::downgrade(channel),
        }
    }

    /// The subscription id.
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Explicitly unsubscribe (same as dropping the handle).
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.upgrade() {
            channel.unregister(self.id);
        }
    }
}

impl core::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
