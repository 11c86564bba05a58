//! Data layer for the Brigade engine (`PostgreSQL` + `Dragonfly`).
//!
//! `PostgreSQL` is the durable store across restarts for the review
//! transition log and task instances. `Dragonfly` holds the durable tier of
//! the sync bus so late sessions of a restarted engine can still catch up.
//!
//! ```text
//! Engine tick
//!     |
//!     +-- persistence outbox --> PostgreSQL (ChecklistStore)
//!     |
//!     +-- SyncBus shadow ------> DragonflyShadow (mirror) --flush--> Dragonfly
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- `PostgreSQL` connection pool, configuration, migrations
//! - [`checklist_store`] -- transitions and task instances (`PersistenceAdapter`)
//! - [`dragonfly`] -- `Dragonfly` connection and JSON hash operations
//! - [`shadow`] -- write-behind `ShadowStore`
//! - [`error`] -- Shared error types

pub mod checklist_store;
pub mod dragonfly;
pub mod error;
pub mod postgres;
pub mod shadow;

// Re-export primary types for convenience.
pub use checklist_store::ChecklistStore;
pub use dragonfly::DragonflyPool;
pub use error::DbError;
pub use postgres::{PostgresConfig, PostgresPool};
pub use shadow::DragonflyShadow;
