//! Engine binary for the Brigade service-period checklist.
//!
//! This is the main entry point that wires together the period
//! scheduler, review workflow, sync bus, persistence, and the session
//! API. It loads configuration, initializes all subsystems, and runs the
//! engine loop until interrupted.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `brigade-config.yaml` (or `BRIGADE_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Connect to `PostgreSQL` and run migrations
//! 4. Connect to `Dragonfly` and load the sync shadow
//! 5. Build the sync bus and bridge it to NATS
//! 6. Build the engine and recover state
//! 7. Spawn the engine loop and the shadow flusher
//! 8. Serve the session API until Ctrl-C
//! 9. Stop the loop and flush what is left

mod error;
mod nats_bridge;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use brigade_core::clock::{ClockSource, SystemClock};
use brigade_core::collaborators::TracingNotifier;
use brigade_core::config::{EngineConfig, LoggingConfig};
use brigade_core::engine::Engine;
use brigade_core::runner::{self, RunControl, RunnerSettings};
use brigade_db::{DragonflyPool, DragonflyShadow, PostgresConfig, PostgresPool};
use brigade_server::{AppState, ServerConfig};
use brigade_sync::{LocalChannel, MemoryShadow, ShadowStore, SyncBus};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::StartupError;

/// Default configuration file, relative to the working directory.
const CONFIG_FILE: &str = "brigade-config.yaml";

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if any initialization step fails.
#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging)?;
    info!(
        poll_interval_ms = config.scheduler.poll_interval_ms,
        periods = config.catalog.periods.len(),
        tasks = config.catalog.tasks.len(),
        "brigade-engine starting"
    );

    // 3. PostgreSQL.
    let postgres =
        PostgresPool::connect(&PostgresConfig::new(&config.infrastructure.postgres_url)).await?;
    postgres.run_migrations().await?;
    let persistence = Arc::new(postgres.checklist_store());
    info!("PostgreSQL connected, migrations applied");

    // 4. Dragonfly shadow. Without it the shadow lives in memory only.
    let dragonfly = match connect_shadow(&config.infrastructure.dragonfly_url).await {
        Ok(pair) => Some(pair),
        Err(e) => {
            warn!(
                error = %e,
                "Dragonfly unavailable, sync shadow will not survive a restart"
            );
            None
        }
    };
    let shadow: Arc<dyn ShadowStore> = match &dragonfly {
        Some((_, shadow)) => Arc::clone(shadow) as Arc<dyn ShadowStore>,
        None => Arc::new(MemoryShadow::new()),
    };

    // 5. Sync bus, bridged to other processes over NATS when reachable.
    let bus = Arc::new(SyncBus::new(Arc::new(LocalChannel::new()), shadow));
    let nats_url = &config.infrastructure.nats_url;
    match async_nats::connect(nats_url.as_str()).await {
        Ok(client) => {
            nats_bridge::attach(client, config.sync.nats_subject.clone(), &bus).await?;
        }
        Err(e) => {
            warn!(
                nats_url = %nats_url,
                error = %e,
                "NATS unavailable, sync limited to this process"
            );
        }
    }

    // 6. Engine and recovery.
    let engine = Engine::new(
        &config,
        ClockSource::new(Arc::new(SystemClock), &config.clock),
        Arc::clone(&bus),
        Arc::new(TracingNotifier),
    )?;
    let engine = Arc::new(Mutex::new(engine));
    let snapshot_path = config.snapshot.path.as_ref().map(PathBuf::from);
    let recovery = runner::recover(&engine, persistence.as_ref(), snapshot_path.as_deref()).await;
    info!(?recovery, "Engine state recovered");

    // 7. Engine loop and shadow flusher.
    let control = Arc::new(RunControl::new(config.scheduler.poll_interval_ms));
    let settings = RunnerSettings {
        snapshot_path,
        snapshot_interval_ticks: config.snapshot.interval_ticks,
        refresh_ticks: config.persistence.refresh_ticks,
    };
    let loop_handle = tokio::spawn(runner::run_engine(
        Arc::clone(&engine),
        Arc::clone(&persistence),
        Arc::clone(&control),
        settings,
    ));
    let flush_every = Duration::from_millis(
        config
            .scheduler
            .poll_interval_ms
            .saturating_mul(config.sync.shadow_flush_ticks)
            .max(1),
    );
    let flusher = dragonfly
        .as_ref()
        .map(|(pool, shadow)| spawn_flusher(pool.clone(), Arc::clone(shadow), flush_every));

    // 8. Session API.
    let app_state = Arc::new(
        AppState::new(Arc::clone(&engine), Arc::clone(&bus), config.sync.ws_buffer)?
            .with_run_control(Arc::clone(&control)),
    );
    let server_config = ServerConfig {
        port: config.infrastructure.http_port,
        ..ServerConfig::default()
    };
    let stop = Arc::clone(&control);
    let served = brigade_server::start_server(&server_config, app_state, async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl-C handler failed: {e}");
        }
        info!("Shutdown requested");
        stop.request_stop();
    })
    .await;

    // 9. Drain.
    control.request_stop();
    match loop_handle.await {
        Ok(ticks) => info!(ticks, "Engine loop stopped"),
        Err(e) => warn!("Engine loop task failed: {e}"),
    }
    if let Some(handle) = flusher {
        handle.abort();
    }
    if let Some((pool, shadow)) = &dragonfly {
        match shadow.flush(pool).await {
            Ok(written) => info!(written, "Final shadow flush"),
            Err(e) => warn!(pending = shadow.pending_len(), "Final shadow flush failed: {e}"),
        }
    }
    let status = engine.lock().await.status();
    if status.unsynced_writes > 0 || status.pending_writes > 0 {
        warn!(
            pending = status.pending_writes,
            unsynced = status.unsynced_writes,
            "Shutting down with writes not yet persisted"
        );
    }
    postgres.close().await;

    served.map_err(StartupError::from)?;
    info!("brigade-engine shutdown complete");
    Ok(())
}

/// Load configuration from `BRIGADE_CONFIG` or `brigade-config.yaml`.
///
/// A missing file yields defaults (with environment overrides applied).
fn load_config() -> Result<EngineConfig, StartupError> {
    let path = std::env::var("BRIGADE_CONFIG")
        .map_or_else(|_| PathBuf::from(CONFIG_FILE), PathBuf::from);
    if path.exists() {
        Ok(EngineConfig::from_file(&path)?)
    } else {
        let mut config = EngineConfig::default();
        config.infrastructure.apply_env_overrides();
        Ok(config)
    }
}

/// `RUST_LOG` wins over the configured level.
fn init_logging(logging: &LoggingConfig) -> Result<(), StartupError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let result = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| StartupError::Logging {
        message: e.to_string(),
    })
}

async fn connect_shadow(
    url: &str,
) -> Result<(DragonflyPool, Arc<DragonflyShadow>), StartupError> {
    let pool = DragonflyPool::connect(url).await?;
    let shadow = DragonflyShadow::load(&pool).await?;
    Ok((pool, Arc::new(shadow)))
}

/// Write shadow slots behind to `Dragonfly` on a fixed cadence.
fn spawn_flusher(
    pool: DragonflyPool,
    shadow: Arc<DragonflyShadow>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = shadow.flush(&pool).await {
                warn!(pending = shadow.pending_len(), "Shadow flush failed: {e}");
            }
        }
    })
}
