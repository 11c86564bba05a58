//! Durable tier: keyed shadow slots for late-joining sessions.
//!
//! Every published message is mirrored into the slot named by
//! [`SyncMessage::shadow_key`]. Task and clock slots keep the last value;
//! schedule slots are one per event, so scanning a date prefix returns
//! that day's period journal in order. Dated slots older than the
//! catch-up horizon are dropped with [`ShadowStore::prune_before`].

use std::collections::BTreeMap;
use std::sync::Mutex;

use brigade_types::{SyncMessage, shadow_key_date};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// One shadow slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowEntry {
    /// Slot key.
    pub key: String,
    /// The last message written to the slot.
    pub message: SyncMessage,
}

impl ShadowEntry {
    /// Mirror a message into its own slot.
    pub fn of(message: SyncMessage) -> Self {
        Self {
            key: message.shadow_key(),
            message,
        }
    }
}

/// Storage for the durable tier.
pub trait ShadowStore: Send + Sync {
    /// Overwrite the slot named by `entry.key`.
    fn write(&self, entry: ShadowEntry) -> Result<(), SyncError>;

    /// Read one slot.
    fn read(&self, key: &str) -> Result<Option<ShadowEntry>, SyncError>;

    /// Read every slot whose key starts with `prefix`, sorted by key.
    fn scan(&self, prefix: &str) -> Result<Vec<ShadowEntry>, SyncError>;

    /// Drop every dated slot (task and schedule) before `cutoff`.
    /// Returns how many slots were removed.
    fn prune_before(&self, cutoff: NaiveDate) -> Result<usize, SyncError>;
}

/// Shadow store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryShadow {
    slots: Mutex<BTreeMap<String, ShadowEntry>>,
}

impl MemoryShadow {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.lock().map_or(0, |slots| slots.len())
    }

    /// Whether no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove dated slots before `cutoff` and return their keys.
    ///
    /// # Errors
    ///
    /// [`SyncError::Poisoned`] if the slot map lock is poisoned.
    pub fn remove_before(&self, cutoff: NaiveDate) -> Result<Vec<String>, SyncError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_poisoned| SyncError::Poisoned("memory shadow"))?;
        let expired: Vec<String> = slots
            .keys()
            .filter(|key| shadow_key_date(key).is_some_and(|date| date < cutoff))
            .cloned()
            .collect();
        for key in &expired {
            slots.remove(key);
        }
        Ok(expired)
    }
}

impl ShadowStore for MemoryShadow {
    fn write(&self, entry: ShadowEntry) -> Result<(), SyncError> {
        self.slots
            .lock()
            .map_err(|_poisoned| SyncError::Poisoned("memory shadow"))?
            .insert(entry.key.clone(), entry);
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<ShadowEntry>, SyncError> {
        Ok(self
            .slots
            .lock()
            .map_err(|_poisoned| SyncError::Poisoned("memory shadow"))?
            .get(key)
            .cloned())
    }

    fn scan(&self, prefix: &str) -> Result<Vec<ShadowEntry>, SyncError> {
        let slots = self
            .slots
            .lock()
            .map_err(|_poisoned| SyncError::Poisoned("memory shadow"))?;
        Ok(slots
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    fn prune_before(&self, cutoff: NaiveDate) -> Result<usize, SyncError> {
        Ok(self.remove_before(cutoff)?.len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use brigade_types::{PeriodId, SessionId, SyncPayload};
    use chrono::NaiveDate;

    use super::*;

    fn entered(day: u32, seq: u32) -> SyncMessage {
        let at = NaiveDate::from_ymd_opt(2026, 10, day)
            .unwrap()
            .and_hms_opt(11, 0, 0)
            .unwrap();
        SyncMessage::new(
            SessionId::new(),
            at,
            SyncPayload::PeriodEntered {
                period: PeriodId::from("lunch_service"),
                at,
                seq,
            },
        )
    }

    #[test]
    fn last_write_wins_per_slot() {
        let shadow = MemoryShadow::new();
        let first = SyncMessage::new(
            SessionId::new(),
            entered(15, 0).timestamp,
            SyncPayload::ClockOffset { offset_secs: Some(10) },
        );
        let second = SyncMessage::new(
            SessionId::new(),
            entered(15, 0).timestamp,
            SyncPayload::ClockOffset { offset_secs: None },
        );
        shadow.write(ShadowEntry::of(first)).unwrap();
        shadow.write(ShadowEntry::of(second.clone())).unwrap();
        let slot = shadow.read("clock:offset").unwrap().unwrap();
        assert_eq!(slot.message, second);
        assert_eq!(shadow.len(), 1);
    }

    #[test]
    fn scan_returns_only_prefix_in_key_order() {
        let shadow = MemoryShadow::new();
        shadow.write(ShadowEntry::of(entered(15, 2))).unwrap();
        shadow.write(ShadowEntry::of(entered(15, 1))).unwrap();
        shadow.write(ShadowEntry::of(entered(16, 0))).unwrap();

        let day = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let journal = shadow.scan(&brigade_types::schedule_prefix(day)).unwrap();
        let seqs: Vec<u32> = journal
            .iter()
            .filter_map(|entry| match entry.message.payload {
                SyncPayload::PeriodEntered { seq, .. } => Some(seq),
                _ => None,
            })
            .collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn pruning_keeps_recent_days_and_the_clock() {
        let shadow = MemoryShadow::new();
        shadow.write(ShadowEntry::of(entered(13, 0))).unwrap();
        shadow.write(ShadowEntry::of(entered(14, 0))).unwrap();
        shadow.write(ShadowEntry::of(entered(15, 0))).unwrap();
        shadow
            .write(ShadowEntry::of(SyncMessage::new(
                SessionId::new(),
                entered(13, 0).timestamp,
                SyncPayload::ClockOffset { offset_secs: Some(60) },
            )))
            .unwrap();

        let cutoff = NaiveDate::from_ymd_opt(2026, 10, 14).unwrap();
        assert_eq!(shadow.prune_before(cutoff).unwrap(), 1);
        assert_eq!(shadow.len(), 3);
        assert!(shadow.read("clock:offset").unwrap().is_some());
        assert!(shadow
            .scan(&brigade_types::schedule_prefix(entered(13, 0).timestamp.date()))
            .unwrap()
            .is_empty());
    }
}
