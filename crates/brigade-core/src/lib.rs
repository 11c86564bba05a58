//! Period scheduling, task lifecycle, and review workflow for the Brigade
//! service-period engine.
//!
//! The core is synchronous and tick driven. Every mutation updates
//! in-memory state first, publishes an invalidation hint on the
//! [`SyncBus`](brigade_sync::SyncBus), and queues its durable writes in
//! the persistence outbox. The async [`runner`] performs those writes
//! outside the engine lock.
//!
//! # Modules
//!
//! - [`clock`] -- Wall clock plus a bounded simulated offset.
//! - [`config`] -- Configuration loading from `brigade-config.yaml` into
//!   strongly-typed structs.
//! - [`catalog`] -- Period and task catalogs, validated at load.
//! - [`scheduler`] -- Active-period resolution and transition synthesis
//!   across clock jumps and midnight.
//! - [`journal`] -- Append-only review transition log.
//! - [`tasks`] -- Task instance state machine with the review sub-state.
//! - [`review`] -- [`ReviewWorkflowController`] with explicit session
//!   context.
//! - [`collaborators`] -- Persistence, media, and notification traits with
//!   in-memory implementations.
//! - [`outbox`] -- Durable writes awaiting persistence, with backoff.
//! - [`snapshot`] -- Validated engine snapshots.
//! - [`session`] -- Client-side session projection and catch-up.
//! - [`engine`] -- The [`Engine`] facade driven once per tick.
//! - [`runner`] -- The async loop with operator controls.
//!
//! [`ReviewWorkflowController`]: review::ReviewWorkflowController
//! [`Engine`]: engine::Engine

pub mod catalog;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod journal;
pub mod outbox;
pub mod review;
pub mod runner;
pub mod scheduler;
pub mod session;
pub mod snapshot;
pub mod tasks;
