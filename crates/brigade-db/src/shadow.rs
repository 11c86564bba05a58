//! Write-behind shadow store on `Dragonfly`.
//!
//! The sync bus writes shadow slots synchronously while the engine lock is
//! held, so [`DragonflyShadow`] answers reads and writes from an in-memory
//! mirror and queues every write. [`DragonflyShadow::flush`] pushes the
//! queue to `Dragonfly` from a background task; a failed flush puts the
//! batch back so nothing is lost while `Dragonfly` is down.
//!
//! On start-up [`DragonflyShadow::load`] fills the mirror from `Dragonfly`
//! so late sessions of a restarted engine still catch up on the day.
//! Pruned slots are queued the same way and deleted on the next flush.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use brigade_sync::{MemoryShadow, ShadowEntry, ShadowStore, SyncError};
use chrono::NaiveDate;

use crate::dragonfly::{DragonflyPool, SHADOW_HASH};
use crate::error::DbError;

/// Shadow store mirrored in memory and persisted to `Dragonfly`.
#[derive(Debug, Default)]
pub struct DragonflyShadow {
    mirror: MemoryShadow,
    pending: Mutex<BTreeMap<String, ShadowEntry>>,
    expired: Mutex<BTreeSet<String>>,
}

impl DragonflyShadow {
    /// An empty store that has not been loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding every slot currently in `Dragonfly`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the hash cannot be read or decoded.
    pub async fn load(pool: &DragonflyPool) -> Result<Self, DbError> {
        let shadow = Self::new();
        let slots: Vec<(String, ShadowEntry)> = pool.hgetall_json(SHADOW_HASH).await?;
        let count = slots.len();
        for (_, entry) in slots {
            shadow
                .mirror
                .write(entry)
                .map_err(|e| DbError::Config(e.to_string()))?;
        }
        tracing::info!(slots = count, "Loaded shadow slots from Dragonfly");
        Ok(shadow)
    }

    /// Number of slot writes and deletions waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        let writes = self.pending.lock().map_or(0, |pending| pending.len());
        let deletes = self.expired.lock().map_or(0, |expired| expired.len());
        writes.saturating_add(deletes)
    }

    /// Push every queued write and deletion to `Dragonfly`.
    ///
    /// Returns how many slots were touched. On failure the batch is
    /// re-queued unless a newer write for the same slot arrived meanwhile.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the write or the delete fails.
    pub async fn flush(&self, pool: &DragonflyPool) -> Result<usize, DbError> {
        let batch = self.take_pending();
        let written = batch.len();
        if !batch.is_empty() {
            let fields: Vec<(String, ShadowEntry)> = batch.into_iter().collect();
            if let Err(err) = pool.hset_json(SHADOW_HASH, &fields).await {
                tracing::warn!(slots = fields.len(), error = %err, "Shadow flush failed, re-queued");
                self.requeue(fields);
                return Err(err);
            }
        }

        let expired = self.take_expired();
        let deleted = expired.len();
        if !expired.is_empty() {
            if let Err(err) = pool.hdel(SHADOW_HASH, expired.clone()).await {
                tracing::warn!(slots = deleted, error = %err, "Shadow prune failed, re-queued");
                self.requeue_expired(expired);
                return Err(err);
            }
        }

        let touched = written.saturating_add(deleted);
        if touched > 0 {
            tracing::debug!(written, deleted, "Flushed shadow slots");
        }
        Ok(touched)
    }

    fn take_pending(&self) -> BTreeMap<String, ShadowEntry> {
        self.pending
            .lock()
            .map(|mut pending| std::mem::take(&mut *pending))
            .unwrap_or_default()
    }

    fn requeue(&self, fields: Vec<(String, ShadowEntry)>) {
        if let Ok(mut pending) = self.pending.lock() {
            for (key, entry) in fields {
                pending.entry(key).or_insert(entry);
            }
        }
    }

    fn take_expired(&self) -> Vec<String> {
        self.expired
            .lock()
            .map(|mut expired| std::mem::take(&mut *expired).into_iter().collect())
            .unwrap_or_default()
    }

    fn requeue_expired(&self, keys: Vec<String>) {
        let Ok(pending) = self.pending.lock() else {
            return;
        };
        if let Ok(mut expired) = self.expired.lock() {
            expired.extend(keys.into_iter().filter(|key| !pending.contains_key(key)));
        }
    }
}

impl ShadowStore for DragonflyShadow {
    fn write(&self, entry: ShadowEntry) -> Result<(), SyncError> {
        self.pending
            .lock()
            .map_err(|_poisoned| SyncError::Poisoned("dragonfly shadow queue"))?
            .insert(entry.key.clone(), entry.clone());
        if let Ok(mut expired) = self.expired.lock() {
            expired.remove(&entry.key);
        }
        self.mirror.write(entry)
    }

    fn read(&self, key: &str) -> Result<Option<ShadowEntry>, SyncError> {
        self.mirror.read(key)
    }

    fn scan(&self, prefix: &str) -> Result<Vec<ShadowEntry>, SyncError> {
        self.mirror.scan(prefix)
    }

    fn prune_before(&self, cutoff: NaiveDate) -> Result<usize, SyncError> {
        let removed = self.mirror.remove_before(cutoff)?;
        let mut pending = self
            .pending
            .lock()
            .map_err(|_poisoned| SyncError::Poisoned("dragonfly shadow queue"))?;
        let mut expired = self
            .expired
            .lock()
            .map_err(|_poisoned| SyncError::Poisoned("dragonfly shadow queue"))?;
        for key in &removed {
            pending.remove(key);
            expired.insert(key.clone());
        }
        Ok(removed.len())
    }
}
