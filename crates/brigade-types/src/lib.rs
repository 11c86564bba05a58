//! Shared type definitions for the Brigade service-period engine.
//!
//! This crate is the single source of truth for all types used across the
//! Brigade workspace. Types defined here flow downstream to `TypeScript`
//! via `ts-rs` for the client sessions.
//!
//! # Modules
//!
//! - [`ids`] -- Identifier newtypes (UUID-backed runtime ids, string catalog keys)
//! - [`enums`] -- Evidence kinds, lifecycle states, log actions, message types
//! - [`structs`] -- Periods, task definitions, task instances, transition log
//! - [`sync`] -- Sync bus messages and shadow slot keys

pub mod enums;
pub mod ids;
pub mod structs;
pub mod sync;

// Re-export all public types at crate root for convenience.
pub use enums::{
    AlertKind, EvidenceKind, ReviewAction, ReviewStatus, SyncMessageType, TaskStatus, Verdict,
};
pub use ids::{MessageId, PeriodId, RoleName, SessionId, TaskDefId, TransitionId, UserId};
pub use structs::{
    EvidenceRef, Period, RejectionRecord, ReviewTransition, ScheduleEvent, TaskDefinition,
    TaskInstance, TaskKey,
};
pub use sync::{CLOCK_OFFSET_KEY, SyncMessage, SyncPayload, schedule_prefix, shadow_key_date};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        // ts-rs generates TypeScript bindings when types with
        // #[ts(export)] are used. The files are written to the `bindings/`
        // directory relative to the crate root.
        use ts_rs::TS;

        // IDs
        let _ = crate::ids::SessionId::export_all();
        let _ = crate::ids::TransitionId::export_all();
        let _ = crate::ids::MessageId::export_all();
        let _ = crate::ids::PeriodId::export_all();
        let _ = crate::ids::TaskDefId::export_all();
        let _ = crate::ids::UserId::export_all();
        let _ = crate::ids::RoleName::export_all();

        // Enums
        let _ = crate::enums::EvidenceKind::export_all();
        let _ = crate::enums::TaskStatus::export_all();
        let _ = crate::enums::ReviewStatus::export_all();
        let _ = crate::enums::ReviewAction::export_all();
        let _ = crate::enums::Verdict::export_all();
        let _ = crate::enums::SyncMessageType::export_all();
        let _ = crate::enums::AlertKind::export_all();

        // Structs
        let _ = crate::structs::Period::export_all();
        let _ = crate::structs::TaskDefinition::export_all();
        let _ = crate::structs::TaskKey::export_all();
        let _ = crate::structs::EvidenceRef::export_all();
        let _ = crate::structs::RejectionRecord::export_all();
        let _ = crate::structs::TaskInstance::export_all();
        let _ = crate::structs::ReviewTransition::export_all();
        let _ = crate::structs::ScheduleEvent::export_all();

        // Sync
        let _ = crate::sync::SyncPayload::export_all();
        let _ = crate::sync::SyncMessage::export_all();
    }
}
