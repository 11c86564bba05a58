//! Error types for the sync bus.

/// Errors raised by sync bus transports and shadow stores.
///
/// None of these reach end users: a failed ephemeral delivery degrades to
/// shadow catch-up, and a failed shadow write is logged.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The ephemeral channel cannot deliver right now.
    #[error("sync delivery failure: {0}")]
    DeliveryFailure(String),

    /// The durable shadow store rejected a read or write.
    #[error("shadow store error: {0}")]
    Shadow(String),

    /// A shared lock was poisoned by a panicking holder.
    #[error("sync bus lock poisoned: {0}")]
    Poisoned(&'static str),

    /// A message could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
