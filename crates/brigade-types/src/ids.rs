//! Type-safe identifier wrappers.
//!
//! Two families of identifiers exist:
//!
//! - Runtime identities (sessions, transitions, messages) wrap a [`Uuid`]
//!   generated as UUID v7 so that sorting by id follows creation order.
//! - Catalog keys (periods, task definitions, users, roles) wrap a
//!   `String`. They come from configuration and are stable across
//!   deployments, which is what makes `(task_def_id, calendar_date)` a
//!   usable identity for task instances.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

/// Generates a newtype wrapper around a configuration-supplied string key.
macro_rules! define_key {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub String);

        impl $name {
            /// Create a key from anything string-like.
            pub fn new(key: impl Into<String>) -> Self {
                Self(key.into())
            }

            /// Borrow the key as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(key: &str) -> Self {
                Self(key.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(key: String) -> Self {
                Self(key)
            }
        }
    };
}

define_id! {
    /// Unique identifier for an open client session (one browser tab,
    /// kiosk, or engine process).
    SessionId
}

define_id! {
    /// Unique identifier for an entry in the append-only review transition
    /// log. Used as the de-duplication key during replay.
    TransitionId
}

define_id! {
    /// Unique identifier for a published sync message.
    MessageId
}

define_key! {
    /// Catalog key of an operational period (e.g. `opening`).
    PeriodId
}

define_key! {
    /// Catalog key of a task definition (e.g. `opening-1`).
    TaskDefId
}

define_key! {
    /// Identifier of a staff member acting through a session.
    UserId
}

define_key! {
    /// Name of a staff role that owns checklists (e.g. `kitchen`).
    RoleName
}

impl UserId {
    /// The user recorded on transitions generated by the scheduler itself.
    pub fn system() -> Self {
        Self::new("system")
    }
}
