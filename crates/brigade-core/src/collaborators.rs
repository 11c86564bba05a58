//! External collaborators the engine calls through opaque capabilities.
//!
//! - [`PersistenceAdapter`] -- durable store for transitions and instances
//! - [`MediaStore`] -- evidence blob upload, returns an [`EvidenceRef`]
//! - [`Notifier`] -- fire-and-forget staff alerts
//!
//! Each trait ships with an in-process implementation used by tests and
//! single-node setups. The `PostgreSQL` adapter lives in `brigade-db`.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use brigade_types::{
    AlertKind, EvidenceKind, EvidenceRef, ReviewTransition, TaskInstance, TaskKey, UserId,
};
use chrono::NaiveDate;
use tracing::info;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Errors from a persistence backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistError {
    /// The store could not be reached.
    #[error("persistence unavailable: {0}")]
    Unavailable(String),

    /// The store refused the write or returned malformed data.
    #[error("persistence rejected the operation: {0}")]
    Rejected(String),
}

/// Durable store for the transition log and task instances.
///
/// Instance upserts are idempotent on `(task_def_id, calendar_date)` with
/// last-writer-wins; transition inserts are append-only and idempotent on
/// the transition id.
pub trait PersistenceAdapter: Send + Sync {
    /// Append one transition record.
    fn insert_transition(
        &self,
        record: &ReviewTransition,
    ) -> impl Future<Output = Result<(), PersistError>> + Send;

    /// Transitions recorded on `date`, optionally for one user, ordered by
    /// timestamp.
    fn query_transitions(
        &self,
        user: Option<&UserId>,
        date: NaiveDate,
    ) -> impl Future<Output = Result<Vec<ReviewTransition>, PersistError>> + Send;

    /// Insert or replace an instance.
    fn upsert_task_instance(
        &self,
        instance: &TaskInstance,
    ) -> impl Future<Output = Result<(), PersistError>> + Send;

    /// Every instance for `date`.
    fn load_task_instances(
        &self,
        date: NaiveDate,
    ) -> impl Future<Output = Result<Vec<TaskInstance>, PersistError>> + Send;
}

#[derive(Debug, Default)]
struct MemoryTables {
    transitions: Vec<ReviewTransition>,
    instances: BTreeMap<TaskKey, TaskInstance>,
}

/// In-memory persistence with failure injection.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    tables: Mutex<MemoryTables>,
    offline: AtomicBool,
    fail_next: AtomicU32,
}

impl MemoryPersistence {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail until set back to `false`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    /// Make the next `n` calls fail.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::Release);
    }

    /// Number of stored transitions.
    pub fn transition_count(&self) -> usize {
        self.tables.lock().map_or(0, |t| t.transitions.len())
    }

    /// A stored instance.
    pub fn instance(&self, key: &TaskKey) -> Option<TaskInstance> {
        self.tables
            .lock()
            .ok()
            .and_then(|t| t.instances.get(key).cloned())
    }

    fn check(&self) -> Result<(), PersistError> {
        if self.offline.load(Ordering::Acquire) {
            return Err(PersistError::Unavailable("store offline".to_owned()));
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(PersistError::Unavailable("injected failure".to_owned()));
        }
        Ok(())
    }

    fn tables(&self) -> Result<std::sync::MutexGuard<'_, MemoryTables>, PersistError> {
        self.tables
            .lock()
            .map_err(|_poisoned| PersistError::Unavailable("memory tables poisoned".to_owned()))
    }
}

impl PersistenceAdapter for MemoryPersistence {
    async fn insert_transition(&self, record: &ReviewTransition) -> Result<(), PersistError> {
        self.check()?;
        let mut tables = self.tables()?;
        if !tables.transitions.iter().any(|t| t.id == record.id) {
            tables.transitions.push(record.clone());
        }
        Ok(())
    }

    async fn query_transitions(
        &self,
        user: Option<&UserId>,
        date: NaiveDate,
    ) -> Result<Vec<ReviewTransition>, PersistError> {
        self.check()?;
        let tables = self.tables()?;
        let mut rows: Vec<ReviewTransition> = tables
            .transitions
            .iter()
            .filter(|t| t.calendar_date == date && user.is_none_or(|u| &t.user_id == u))
            .cloned()
            .collect();
        rows.sort_by_key(|t| (t.timestamp, t.id));
        Ok(rows)
    }

    async fn upsert_task_instance(&self, instance: &TaskInstance) -> Result<(), PersistError> {
        self.check()?;
        let mut tables = self.tables()?;
        let stale = tables
            .instances
            .get(&instance.key)
            .is_some_and(|stored| stored.revision > instance.revision);
        if !stale {
            tables
                .instances
                .insert(instance.key.clone(), instance.clone());
        }
        Ok(())
    }

    async fn load_task_instances(&self, date: NaiveDate) -> Result<Vec<TaskInstance>, PersistError> {
        self.check()?;
        Ok(self
            .tables()?
            .instances
            .values()
            .filter(|i| i.key.date == date)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

/// Errors from evidence upload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    /// The upload did not complete.
    #[error("evidence upload failed: {0}")]
    UploadFailed(String),

    /// The payload was empty.
    #[error("evidence payload is empty")]
    Empty,
}

/// What is being uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceMetadata {
    /// The task the evidence belongs to.
    pub task: TaskKey,
    /// Evidence kind (photo, audio, ...).
    pub kind: EvidenceKind,
    /// MIME type of the payload.
    pub content_type: String,
}

/// Blob storage for evidence.
pub trait MediaStore: Send + Sync {
    /// Upload bytes and return a reference to them.
    fn upload_evidence(
        &self,
        bytes: Vec<u8>,
        metadata: EvidenceMetadata,
    ) -> impl Future<Output = Result<EvidenceRef, MediaError>> + Send;
}

/// Media store that keeps blobs in memory under `memory://` URLs.
#[derive(Debug, Default)]
pub struct MemoryMediaStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
    failing: AtomicBool,
}

impl MemoryMediaStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make uploads fail until set back to `false`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.lock().map_or(0, |b| b.len())
    }

    /// Whether no blob is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MediaStore for MemoryMediaStore {
    async fn upload_evidence(
        &self,
        bytes: Vec<u8>,
        metadata: EvidenceMetadata,
    ) -> Result<EvidenceRef, MediaError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(MediaError::UploadFailed("media store offline".to_owned()));
        }
        if bytes.is_empty() {
            return Err(MediaError::Empty);
        }
        let url = format!(
            "memory://evidence/{}/{}",
            metadata.task.target_id(),
            Uuid::now_v7()
        );
        self.blobs
            .lock()
            .map_err(|_poisoned| MediaError::UploadFailed("blob table poisoned".to_owned()))?
            .insert(url.clone(), bytes);
        Ok(EvidenceRef {
            kind: metadata.kind,
            url,
            value: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Errors from alert delivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    /// The alert could not be delivered.
    #[error("alert delivery failed: {0}")]
    Delivery(String),
}

/// Fire-and-forget staff alerts. Failures are logged by the caller.
pub trait Notifier: Send + Sync {
    /// Raise an alert.
    fn alert(&self, kind: AlertKind, message: &str) -> Result<(), NotifyError>;
}

/// Notifier that writes alerts to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn alert(&self, kind: AlertKind, message: &str) -> Result<(), NotifyError> {
        info!(?kind, message, "Alert");
        Ok(())
    }
}

/// Notifier that keeps every alert for inspection.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<(AlertKind, String)>>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every alert raised so far.
    pub fn alerts(&self) -> Vec<(AlertKind, String)> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }

    /// How many alerts of one kind were raised.
    pub fn count(&self, kind: AlertKind) -> usize {
        self.alerts
            .lock()
            .map_or(0, |a| a.iter().filter(|(k, _)| *k == kind).count())
    }
}

impl Notifier for RecordingNotifier {
    fn alert(&self, kind: AlertKind, message: &str) -> Result<(), NotifyError> {
        self.alerts
            .lock()
            .map_err(|_poisoned| NotifyError::Delivery("recorder poisoned".to_owned()))?
            .push((kind, message.to_owned()));
        Ok(())
    }
}
