//! Persistence Module
//!
//! Durability for the in-memory [`Store`](crate::storage::Store) is built
//! from two files:
//!
//! - **AOF**: a line-oriented log of every mutation, replayed on startup.
//! - **Snapshot**: a compact binary dump of the whole store, written
//!   periodically so the log can be compacted.
//!
//! ## Lifecycle
//!
//! ```text
//!   startup:   load snapshot ──> replay AOF ──> open AOF ──> serve
//!
//!   serving:   SET/DEL ──> AOF write (under shard lock) ──> store
//!
//!   every 1s:  AofFlusher    flush (+ fsync under everysec)
//!   every Ns:  Snapshotter   mark log ──> save snapshot ──> compact log to mark
//! ```

pub mod aof;
pub mod record;
pub mod recovery;
pub mod replay;
pub mod snapshot;

pub use aof::{AofError, AofFlusher, AofWriter, Compaction, FsyncPolicy, LogMark};
pub use record::{Record, RecordError};
pub use recovery::{
    recover, snapshot_and_compact, Durability, DurabilityOptions, RecoveryError, RecoveryPhase,
    RecoveryReport, SnapshotCycle, Snapshotter,
};
pub use replay::{replay, ReplayStats};
pub use snapshot::{RecordSink, SnapshotError, SnapshotWriter};

use std::path::{Path, PathBuf};

/// Sibling path used while a file is being rewritten: `<path>.tmp`.
pub(crate) fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Fsyncs the directory holding `path` so a rename into it is durable.
///
/// Failure is logged and otherwise ignored; the renamed file itself is
/// already synced.
#[cfg(unix)]
pub(crate) fn sync_parent_dir(path: &Path) {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if let Err(e) = std::fs::File::open(parent).and_then(|dir| dir.sync_all()) {
        tracing::debug!(dir = %parent.display(), error = %e, "Could not fsync directory");
    }
}

#[cfg(not(unix))]
pub(crate) fn sync_parent_dir(_path: &Path) {}
