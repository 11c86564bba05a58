//! Persistence outbox.
//!
//! Mutations are applied to in-memory state first and their durable
//! writes are queued here. The runner drains due writes, performs them
//! against the [`PersistenceAdapter`](crate::collaborators::PersistenceAdapter)
//! outside the engine lock, and settles the results. Failed writes are
//! retried with exponential backoff measured in ticks, plus random
//! jitter. After the retry budget is spent a write stays queued but is
//! flagged unsynced until a later attempt succeeds.

use std::collections::BTreeMap;

use brigade_types::{ReviewTransition, TaskInstance, TaskKey};
use rand::Rng;
use tracing::{debug, warn};

use crate::collaborators::PersistError;
use crate::config::PersistenceConfig;

/// One durable write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingWrite {
    /// Append a transition record.
    Transition(ReviewTransition),
    /// Upsert a task instance.
    Instance(TaskInstance),
}

impl PendingWrite {
    /// The instance key for upserts.
    pub const fn instance_key(&self) -> Option<&TaskKey> {
        match self {
            Self::Instance(instance) => Some(&instance.key),
            Self::Transition(_) => None,
        }
    }
}

/// Sequence number identifying a queued write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WriteId(pub u64);

#[derive(Debug, Clone)]
struct QueuedWrite {
    write: PendingWrite,
    attempts: u32,
    due_tick: u64,
    in_flight: bool,
}

/// Summary of the outbox for the "unsynced" indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutboxStatus {
    /// Writes still queued.
    pub pending: usize,
    /// Writes that exhausted the retry budget.
    pub unsynced: usize,
}

/// Queue of durable writes awaiting persistence.
#[derive(Debug, Clone)]
pub struct PersistOutbox {
    queue: BTreeMap<WriteId, QueuedWrite>,
    next_id: u64,
    config: PersistenceConfig,
}

impl PersistOutbox {
    /// Create an empty outbox.
    pub const fn new(config: PersistenceConfig) -> Self {
        Self {
            queue: BTreeMap::new(),
            next_id: 0,
            config,
        }
    }

    /// Queue a write, due immediately.
    ///
    /// A queued (not in-flight) upsert for the same instance is replaced
    /// instead of queuing a second one.
    pub fn enqueue(&mut self, write: PendingWrite, tick: u64) -> WriteId {
        if let Some(key) = write.instance_key() {
            let existing = self
                .queue
                .iter_mut()
                .find(|(_, q)| !q.in_flight && q.write.instance_key() == Some(key));
            if let Some((id, queued)) = existing {
                queued.write = write;
                return *id;
            }
        }
        let id = WriteId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        self.queue.insert(
            id,
            QueuedWrite {
                write,
                attempts: 0,
                due_tick: tick,
                in_flight: false,
            },
        );
        id
    }

    /// Take every write due at `tick`, marking them in flight.
    pub fn take_due(&mut self, tick: u64) -> Vec<(WriteId, PendingWrite)> {
        self.queue
            .iter_mut()
            .filter(|(_, q)| !q.in_flight && q.due_tick <= tick)
            .map(|(id, q)| {
                q.in_flight = true;
                (*id, q.write.clone())
            })
            .collect()
    }

    /// Record the outcome of an attempted write.
    pub fn settle(&mut self, id: WriteId, result: Result<(), PersistError>, tick: u64) {
        match result {
            Ok(()) => {
                if let Some(done) = self.queue.remove(&id) {
                    debug!(write = id.0, attempts = done.attempts, "Write persisted");
                }
            }
            Err(e) => {
                let backoff = self.backoff_for(self.queue.get(&id).map_or(0, |q| q.attempts));
                let budget = self.config.retry_budget;
                if let Some(queued) = self.queue.get_mut(&id) {
                    queued.attempts = queued.attempts.saturating_add(1);
                    queued.in_flight = false;
                    queued.due_tick = tick.saturating_add(backoff);
                    if queued.attempts >= budget {
                        warn!(
                            write = id.0,
                            attempts = queued.attempts,
                            "Persistence retry budget exhausted, write unsynced: {e}"
                        );
                    } else {
                        debug!(write = id.0, attempts = queued.attempts, backoff, "Write failed: {e}");
                    }
                }
            }
        }
    }

    /// Ticks to wait after the `attempts`-th failure (0-based), jittered.
    fn backoff_for(&self, attempts: u32) -> u64 {
        let base = self.config.backoff_base_ticks.max(1);
        let exp = base
            .checked_shl(attempts.min(32))
            .unwrap_or(u64::MAX)
            .min(self.config.backoff_max_ticks.max(base));
        let jitter = rand::rng().random_range(0..=base);
        exp.saturating_add(jitter)
    }

    /// Pending and unsynced counts.
    pub fn status(&self) -> OutboxStatus {
        let budget = self.config.retry_budget;
        OutboxStatus {
            pending: self.queue.len(),
            unsynced: self.queue.values().filter(|q| q.attempts >= budget).count(),
        }
    }

    /// Whether any write has exhausted its retry budget.
    pub fn is_unsynced(&self) -> bool {
        self.status().unsynced > 0
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop every queued write (used on a full reset).
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use brigade_types::{ReviewAction, TaskDefId, UserId};
    use chrono::NaiveDate;

    use super::*;
    use crate::collaborators::{MemoryPersistence, PersistenceAdapter};

    fn instance(n: u32) -> TaskInstance {
        let date = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let mut i = TaskInstance::activated(
            TaskKey::new(TaskDefId::from("opening-1"), date),
            true,
            date.and_hms_opt(8, 0, 0).unwrap(),
        );
        i.submission_count = n;
        i
    }

    fn transition() -> PendingWrite {
        let at = NaiveDate::from_ymd_opt(2026, 10, 15)
            .unwrap()
            .and_hms_opt(8, 5, 0)
            .unwrap();
        PendingWrite::Transition(ReviewTransition::new(
            UserId::from("kim"),
            "opening-1@2026-10-15",
            ReviewAction::Submit,
            at,
        ))
    }

    fn outbox(retry_budget: u32) -> PersistOutbox {
        PersistOutbox::new(PersistenceConfig {
            retry_budget,
            backoff_base_ticks: 1,
            backoff_max_ticks: 8,
            ..PersistenceConfig::default()
        })
    }

    #[test]
    fn instance_upserts_coalesce() {
        let mut out = outbox(5);
        let a = out.enqueue(PendingWrite::Instance(instance(1)), 0);
        let b = out.enqueue(PendingWrite::Instance(instance(2)), 0);
        assert_eq!(a, b);
        let due = out.take_due(0);
        assert_eq!(due.len(), 1);
        assert_eq!(due.first().map(|(_, w)| w.clone()), Some(PendingWrite::Instance(instance(2))));
    }

    #[test]
    fn in_flight_upsert_is_not_replaced() {
        let mut out = outbox(5);
        out.enqueue(PendingWrite::Instance(instance(1)), 0);
        let taken = out.take_due(0);
        out.enqueue(PendingWrite::Instance(instance(2)), 0);
        assert_eq!(taken.len(), 1);
        assert_eq!(out.status().pending, 2);
    }

    #[test]
    fn failures_back_off_then_flag_unsynced() {
        let mut out = outbox(2);
        let id = out.enqueue(transition(), 0);

        let mut tick = 0;
        for _ in 0..2 {
            let due = out.take_due(tick);
            assert_eq!(due.len(), 1);
            out.settle(id, Err(PersistError::Unavailable("down".to_owned())), tick);
            assert!(out.take_due(tick).is_empty());
            tick = tick.saturating_add(20);
        }
        assert!(out.is_unsynced());

        let due = out.take_due(tick);
        assert_eq!(due.len(), 1);
        out.settle(id, Ok(()), tick);
        assert!(out.is_empty());
        assert!(!out.is_unsynced());
    }

    #[tokio::test]
    async fn stale_retry_does_not_overwrite_a_newer_upsert() {
        let store = MemoryPersistence::new();
        let mut out = outbox(5);
        let mut older = instance(1);
        older.revision = 1;
        let mut newer = instance(2);
        newer.revision = 2;

        let first = out.enqueue(PendingWrite::Instance(older.clone()), 0);
        assert_eq!(out.take_due(0).len(), 1);
        let second = out.enqueue(PendingWrite::Instance(newer.clone()), 0);
        assert_ne!(first, second);

        store.fail_next(1);
        let failed = store.upsert_task_instance(&older).await;
        assert!(failed.is_err());
        out.settle(first, failed, 0);

        let due = out.take_due(0);
        assert_eq!(due.first().map(|(id, _)| *id), Some(second));
        out.settle(second, store.upsert_task_instance(&newer).await, 0);

        let retry = out.take_due(100);
        assert_eq!(retry.first().map(|(id, _)| *id), Some(first));
        out.settle(first, store.upsert_task_instance(&older).await, 100);

        assert!(out.is_empty());
        assert_eq!(store.instance(&newer.key), Some(newer));
    }

    #[test]
    fn backoff_is_bounded() {
        let out = outbox(5);
        for attempts in 0..40 {
            let backoff = out.backoff_for(attempts);
            assert!(backoff >= 1);
            assert!(backoff <= 9);
        }
    }
}
