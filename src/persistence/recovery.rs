//! Startup Recovery and Background Durability
//!
//! On startup the store is rebuilt in a fixed order:
//!
//! 1. **LoadSnapshot**: populate the store from the last snapshot.
//! 2. **ReplayLog**: re-apply every record in the AOF on top of it.
//! 3. **Ready**: open the AOF for appending and start serving.
//!
//! While serving, the [`Snapshotter`] periodically writes a new snapshot and
//! compacts the AOF down to the records the snapshot may not reflect.
//!
//! ## Snapshot / Compaction Ordering
//!
//! The log mark is taken *before* the store is traversed. A mutation the
//! snapshot missed was applied after its shard was visited, so its record
//! sits after the mark and survives compaction. Records after the mark that
//! the snapshot did capture are replayed again on restart, which converges
//! to the same state.

use crate::db::Db;
use crate::persistence::aof::{AofError, AofFlusher, AofWriter, Compaction, FsyncPolicy, FLUSH_INTERVAL};
use crate::persistence::replay::{self, ReplayStats};
use crate::persistence::snapshot::{self, SaveStats, SnapshotError};
use crate::storage::{Store, DEFAULT_SHARDS};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default period between snapshots.
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(30);

/// Persistence settings.
#[derive(Debug, Clone)]
pub struct DurabilityOptions {
    /// Whether mutations are logged to the AOF
    pub aof_enabled: bool,

    /// Whether snapshots are loaded at startup and saved periodically
    pub snapshot_enabled: bool,

    pub fsync: FsyncPolicy,
    pub aof_path: PathBuf,
    pub snapshot_path: PathBuf,
    pub snapshot_interval: Duration,

    /// Number of store shards (rounded up to a power of two)
    pub shards: usize,
}

impl Default for DurabilityOptions {
    fn default() -> Self {
        Self {
            aof_enabled: true,
            snapshot_enabled: true,
            fsync: FsyncPolicy::EverySec,
            aof_path: PathBuf::from("data.aof"),
            snapshot_path: PathBuf::from("data.snap"),
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            shards: DEFAULT_SHARDS,
        }
    }
}

impl DurabilityOptions {
    /// Options with both files placed in `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            aof_path: dir.join("data.aof"),
            snapshot_path: dir.join("data.snap"),
            ..Self::default()
        }
    }
}

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("failed to load snapshot: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("failed to replay AOF {path}: {source}")]
    Replay {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open AOF: {0}")]
    OpenLog(#[from] AofError),
}

/// Startup phases, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPhase {
    LoadSnapshot,
    ReplayLog,
    Ready,
}

impl std::fmt::Display for RecoveryPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryPhase::LoadSnapshot => write!(f, "load-snapshot"),
            RecoveryPhase::ReplayLog => write!(f, "replay-log"),
            RecoveryPhase::Ready => write!(f, "ready"),
        }
    }
}

/// What startup recovery restored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Entries read from the snapshot
    pub snapshot_records: u64,

    /// Outcome of the AOF replay
    pub replay: ReplayStats,

    /// Keys in the store once recovery finished
    pub keys: u64,

    pub elapsed: Duration,
}

/// Rebuilds `store` from the snapshot and then the AOF.
///
/// Each source is only read when enabled in `options`. Missing files are a
/// fresh start, not an error.
pub fn recover(store: &Store, options: &DurabilityOptions) -> Result<RecoveryReport, RecoveryError> {
    let started = Instant::now();
    let mut report = RecoveryReport::default();

    if options.snapshot_enabled {
        info!(phase = %RecoveryPhase::LoadSnapshot, path = %options.snapshot_path.display(), "Recovery");
        report.snapshot_records = snapshot::load(&options.snapshot_path, store)?.records;
    }

    if options.aof_enabled {
        info!(phase = %RecoveryPhase::ReplayLog, path = %options.aof_path.display(), "Recovery");
        report.replay = replay::replay(&options.aof_path, store).map_err(|source| RecoveryError::Replay {
            path: options.aof_path.clone(),
            source,
        })?;
    }

    report.keys = store.len();
    report.elapsed = started.elapsed();

    info!(
        phase = %RecoveryPhase::Ready,
        keys = report.keys,
        snapshot_records = report.snapshot_records,
        replayed = report.replay.applied,
        skipped = report.replay.skipped,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Recovery"
    );
    Ok(report)
}

/// Outcome of one snapshot cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotCycle {
    pub saved: SaveStats,

    /// `None` when no AOF is attached
    pub compaction: Option<Compaction>,
}

/// Saves a snapshot of `store` and compacts `aof` to the point the snapshot
/// is known to cover.
///
/// The log is left alone when the save fails.
pub fn snapshot_and_compact(
    store: &Store,
    aof: Option<&AofWriter>,
    path: &Path,
) -> Result<SnapshotCycle, SnapshotError> {
    let mark = aof.map(AofWriter::mark);
    let saved = snapshot::save(path, store)?;

    let compaction = match (aof, mark) {
        (Some(aof), Some(mark)) => match aof.compact_to(mark) {
            Ok(outcome) => {
                if outcome == Compaction::StaleMark {
                    debug!("AOF was rotated during the snapshot; compaction skipped");
                }
                Some(outcome)
            }
            Err(e) => {
                warn!(error = %e, "AOF compaction failed after snapshot");
                None
            }
        },
        _ => None,
    };

    Ok(SnapshotCycle { saved, compaction })
}

/// A handle to the running snapshot task.
///
/// When this handle is dropped, the task will be stopped.
#[derive(Debug)]
pub struct Snapshotter {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Snapshotter {
    /// Starts snapshotting `store` to `path` every `interval`.
    pub fn start(
        store: Arc<Store>,
        aof: Option<Arc<AofWriter>>,
        path: PathBuf,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            path = %path.display(),
            interval_secs = interval.as_secs(),
            "Snapshotter started"
        );
        let task = tokio::spawn(snapshot_loop(store, aof, path, interval, shutdown_rx));

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Signals the task to stop. A snapshot already in progress completes.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stops the task and waits for it to exit.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!("Snapshotter stopped");
    }
}

impl Drop for Snapshotter {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn snapshot_loop(
    store: Arc<Store>,
    aof: Option<Arc<AofWriter>>,
    path: PathBuf,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Snapshotter received shutdown signal");
                    return;
                }
            }
        }

        let store = Arc::clone(&store);
        let aof = aof.clone();
        let path = path.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            snapshot_and_compact(&store, aof.as_deref(), &path)
        })
        .await;

        match outcome {
            Ok(Ok(cycle)) => debug!(
                records = cycle.saved.records,
                compaction = ?cycle.compaction,
                "Snapshot cycle complete"
            ),
            Ok(Err(e)) => warn!(error = %e, "Snapshot failed; AOF left intact"),
            Err(e) => warn!(error = %e, "Snapshot task failed"),
        }
    }
}

/// Owns the persistent state of a running server.
///
/// [`Durability::open`] is the startup gate: it recovers the store and opens
/// the AOF, and any failure there is fatal.
#[derive(Debug)]
pub struct Durability {
    options: DurabilityOptions,
    db: Db,
    aof: Option<Arc<AofWriter>>,
    flusher: Option<AofFlusher>,
    snapshotter: Option<Snapshotter>,
}

impl Durability {
    /// Creates the store, recovers it and opens the AOF.
    ///
    /// A torn final record left by a crash is cut off before the AOF is
    /// reopened for appending.
    pub fn open(options: DurabilityOptions) -> Result<(Self, RecoveryReport), RecoveryError> {
        let store = Arc::new(Store::with_shards(options.shards));
        let report = recover(&store, &options)?;

        let aof = if options.aof_enabled {
            Some(Arc::new(AofWriter::open_truncated(
                &options.aof_path,
                options.fsync,
                report.replay.valid_len,
            )?))
        } else {
            None
        };

        let db = match &aof {
            Some(aof) => Db::with_aof(Arc::clone(&store), Arc::clone(aof)),
            None => Db::in_memory(store),
        };

        Ok((
            Self {
                options,
                db,
                aof,
                flusher: None,
                snapshotter: None,
            },
            report,
        ))
    }

    /// The database handle shared with connections.
    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn options(&self) -> &DurabilityOptions {
        &self.options
    }

    /// Starts the AOF flusher and the snapshotter as configured.
    ///
    /// Must be called from within a tokio runtime. Calling it again is a no-op.
    pub fn start_background(&mut self) {
        if let Some(aof) = &self.aof {
            if aof.policy().needs_flusher() && self.flusher.is_none() {
                self.flusher = Some(AofFlusher::start(Arc::clone(aof), FLUSH_INTERVAL));
            }
        }

        if self.options.snapshot_enabled && self.snapshotter.is_none() {
            self.snapshotter = Some(Snapshotter::start(
                Arc::clone(self.db.store()),
                self.aof.clone(),
                self.options.snapshot_path.clone(),
                self.options.snapshot_interval,
            ));
        }
    }

    /// Stops background tasks and closes the AOF.
    pub async fn shutdown(mut self) -> Result<(), AofError> {
        if let Some(snapshotter) = self.snapshotter.take() {
            snapshotter.shutdown().await;
        }
        if let Some(flusher) = self.flusher.take() {
            flusher.shutdown().await;
        }

        match self.aof.take() {
            Some(aof) => tokio::task::spawn_blocking(move || aof.close())
                .await
                .map_err(|e| AofError::Io(io::Error::other(e)))?,
            None => Ok(()),
        }
    }
}
