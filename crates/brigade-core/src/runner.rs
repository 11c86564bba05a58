//! Engine loop runner with operator controls.
//!
//! [`run_engine`] drives [`Engine::tick`] on a fixed interval. Each
//! iteration:
//!
//! 1. ticks the engine and takes the writes that are due, under the lock,
//! 2. performs those writes against the [`PersistenceAdapter`] with the
//!    lock released,
//! 3. settles the results under the lock,
//! 4. periodically re-reads today's transitions so work recorded by other
//!    processes converges here,
//! 5. periodically writes a snapshot.
//!
//! [`RunControl`] carries the fixed poll interval and the stop flag,
//! shared with the HTTP surface and the shutdown handler.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::collaborators::{PersistError, PersistenceAdapter};
use crate::engine::{Engine, TickReport, load_day};
use crate::outbox::{PendingWrite, WriteId};
use crate::snapshot::{EngineSnapshot, SnapshotError};

/// Shared loop control state.
#[derive(Debug)]
pub struct RunControl {
    interval: Duration,
    stop_requested: AtomicBool,
    wake: Notify,
}

impl RunControl {
    /// Control state for a loop polling every `interval_ms`.
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
            stop_requested: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    /// Request a clean stop. A loop sleeping between ticks wakes at once.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    /// Whether a stop was requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Poll interval in milliseconds.
    pub fn interval_ms(&self) -> u64 {
        u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX)
    }

    async fn sleep(&self) {
        if self.interval.is_zero() {
            return;
        }
        tokio::select! {
            () = tokio::time::sleep(self.interval) => {}
            () = self.wake.notified() => {}
        }
    }
}

/// Loop cadence settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerSettings {
    /// Snapshot file, if snapshots are enabled.
    pub snapshot_path: Option<PathBuf>,
    /// Ticks between snapshots (0 disables periodic snapshots).
    pub snapshot_interval_ticks: u64,
    /// Ticks between re-reads of today's transitions (0 disables).
    pub refresh_ticks: u64,
}

/// Result of one loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// The engine tick.
    pub tick: TickReport,
    /// Writes attempted.
    pub attempted: usize,
    /// Writes that failed.
    pub failed: usize,
    /// Transitions merged from persistence.
    pub merged: usize,
}

/// How the engine came back up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Resumed from a valid snapshot.
    Snapshot,
    /// Loaded from persistence (no snapshot, or an invalid one).
    Persistence,
    /// Persistence was unreachable; started empty.
    Empty,
}

/// Perform writes against persistence. Runs without the engine lock.
pub async fn flush_writes<P: PersistenceAdapter>(
    persistence: &P,
    writes: Vec<(WriteId, PendingWrite)>,
) -> Vec<(WriteId, Result<(), PersistError>)> {
    let mut results = Vec::with_capacity(writes.len());
    for (id, write) in writes {
        let result = match &write {
            PendingWrite::Transition(record) => persistence.insert_transition(record).await,
            PendingWrite::Instance(instance) => persistence.upsert_task_instance(instance).await,
        };
        results.push((id, result));
    }
    results
}

/// Run one loop iteration.
pub async fn step<P: PersistenceAdapter>(
    engine: &Mutex<Engine>,
    persistence: &P,
    settings: &RunnerSettings,
) -> StepReport {
    let (report, due) = {
        let mut engine = engine.lock().await;
        let report = engine.tick();
        let due = engine.controller_mut().outbox_mut().take_due(report.tick);
        (report, due)
    };

    let attempted = due.len();
    let results = flush_writes(persistence, due).await;
    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    {
        let mut engine = engine.lock().await;
        let outbox = engine.controller_mut().outbox_mut();
        for (id, result) in results {
            outbox.settle(id, result, report.tick);
        }
    }

    let mut merged = 0;
    if is_due(report.tick, settings.refresh_ticks) {
        match persistence.query_transitions(None, report.now.date()).await {
            Ok(transitions) => {
                merged = engine.lock().await.merge_transitions(transitions);
            }
            Err(e) => debug!("Transition refresh skipped: {e}"),
        }
    }

    if is_due(report.tick, settings.snapshot_interval_ticks) {
        if let Some(path) = &settings.snapshot_path {
            let snapshot = engine.lock().await.snapshot();
            if let Err(e) = snapshot.save(path) {
                warn!(path = %path.display(), "Snapshot failed: {e}");
            }
        }
    }

    StepReport {
        tick: report,
        attempted,
        failed,
        merged,
    }
}

const fn is_due(tick: u64, every: u64) -> bool {
    matches!(tick.checked_rem(every), Some(0))
}

/// Tick until a stop is requested, then write a final snapshot.
///
/// Returns the number of ticks run.
pub async fn run_engine<P: PersistenceAdapter>(
    engine: Arc<Mutex<Engine>>,
    persistence: Arc<P>,
    control: Arc<RunControl>,
    settings: RunnerSettings,
) -> u64 {
    let mut ticks: u64 = 0;
    info!(interval_ms = control.interval_ms(), "Engine loop starting");

    loop {
        if control.is_stop_requested() {
            break;
        }

        let report = step(&engine, persistence.as_ref(), &settings).await;
        ticks = ticks.saturating_add(1);
        if report.failed > 0 {
            debug!(
                tick = report.tick.tick,
                failed = report.failed,
                "Persistence writes failed, will retry"
            );
        }

        control.sleep().await;
    }

    if let Some(path) = &settings.snapshot_path {
        let snapshot = engine.lock().await.snapshot();
        match snapshot.save(path) {
            Ok(()) => info!(path = %path.display(), "Final snapshot written"),
            Err(e) => warn!(path = %path.display(), "Final snapshot failed: {e}"),
        }
    }
    info!(ticks, "Engine loop stopped");
    ticks
}

/// Bring a fresh engine up to date before the loop starts.
///
/// A valid snapshot is restored as-is. A missing snapshot, or one that
/// fails validation, triggers a full load from persistence.
pub async fn recover<P: PersistenceAdapter>(
    engine: &Mutex<Engine>,
    persistence: &P,
    snapshot_path: Option<&Path>,
) -> Recovery {
    if let Some(path) = snapshot_path {
        match EngineSnapshot::load(path) {
            Ok(snapshot) => {
                engine.lock().await.restore(snapshot);
                return Recovery::Snapshot;
            }
            Err(SnapshotError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No snapshot, loading from persistence");
            }
            Err(e) => {
                warn!(path = %path.display(), "Snapshot rejected, full reset from persistence: {e}");
            }
        }
    }

    let today = engine.lock().await.now().date();
    match load_day(persistence, today).await {
        Ok(records) => {
            engine.lock().await.reset_from(records);
            Recovery::Persistence
        }
        Err(e) => {
            warn!("Persistence unavailable at startup, starting empty: {e}");
            Recovery::Empty
        }
    }
}
