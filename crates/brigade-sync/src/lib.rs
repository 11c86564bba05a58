//! Cross-session synchronization bus for the Brigade engine.
//!
//! Two tiers carry every change notification:
//!
//! 1. **Ephemeral** ([`channel`]) -- delivered only to sessions open at
//!    send time, lost otherwise.
//! 2. **Durable shadow** ([`shadow`]) -- every payload is mirrored into a
//!    keyed slot so a session opened later can read the last value.
//!
//! Messages are invalidation hints. Receivers re-fetch authoritative
//! state, so dropped or reordered messages cannot cause divergence.
//!
//! # Modules
//!
//! - [`bus`] -- [`SyncBus`] with the publish/apply split
//! - [`channel`] -- [`EphemeralChannel`] trait and [`LocalChannel`]
//! - [`shadow`] -- [`ShadowStore`] trait and [`MemoryShadow`]
//! - [`error`] -- [`SyncError`]

pub mod bus;
pub mod channel;
pub mod error;
pub mod shadow;

pub use bus::{Forwarder, PublishReport, SyncBus};
pub use channel::{
    EphemeralChannel, Handler, LocalChannel, SubscriberFilter, Subscription, SubscriptionId,
};
pub use error::SyncError;
pub use shadow::{MemoryShadow, ShadowEntry, ShadowStore};
