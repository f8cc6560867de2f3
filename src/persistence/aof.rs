//! Append-Only File (AOF) Writer
//!
//! The AOF records every mutation as a replayable [`Record`] line. How soon a
//! line reaches the disk is governed by the [`FsyncPolicy`].
//!
//! ## Offsets and Marks
//!
//! The writer counts every byte it has accepted into the current file. That
//! count is the *offset* returned by [`AofWriter::write`]:
//!
//! ```text
//!   file start                    mark                     end
//!   │ SET a 1 │ DEL b │ SET c 2 │ SET a 3 │ SET d 4 │
//!   └──── covered by snapshot ────┘└──── kept tail ───┘
//! ```
//!
//! A [`LogMark`] taken before a snapshot starts lets [`AofWriter::compact_to`]
//! drop exactly the records the snapshot is guaranteed to reflect, while
//! keeping everything appended after the mark.
//!
//! ## Background Flushing
//!
//! Under `everysec` and `off` the writer only buffers. [`AofFlusher`] is the
//! background task that pushes the buffer out once per second (and fsyncs it
//! under `everysec`).

use crate::persistence::record::Record;
use crate::persistence::{sync_parent_dir, tmp_path_for};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Buffer capacity for the log writer (64 KB)
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Interval between background flushes.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// When buffered log writes are forced to persistent storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FsyncPolicy {
    /// fsync before every append returns
    Always,

    /// Buffer appends, flush and fsync once per second
    #[value(name = "everysec")]
    EverySec,

    /// Buffer appends, flush once per second, never fsync
    Off,
}

impl FsyncPolicy {
    /// Whether the policy needs the background [`AofFlusher`].
    pub fn needs_flusher(self) -> bool {
        !matches!(self, FsyncPolicy::Always)
    }
}

impl std::fmt::Display for FsyncPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FsyncPolicy::Always => write!(f, "always"),
            FsyncPolicy::EverySec => write!(f, "everysec"),
            FsyncPolicy::Off => write!(f, "off"),
        }
    }
}

/// Errors raised by the log writer.
#[derive(Debug, Error)]
pub enum AofError {
    #[error("AOF I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("AOF is closed")]
    Closed,
}

/// A position in the log, taken with [`AofWriter::mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogMark {
    /// Bumped by every rotation or compaction
    generation: u64,
    offset: u64,
}

impl LogMark {
    /// Byte offset of the mark in the log file it was taken from.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

/// What [`AofWriter::compact_to`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compaction {
    /// The whole log predated the mark and was truncated to empty
    Truncated,

    /// Records after the mark were kept; `kept` bytes remain
    Retained { dropped: u64, kept: u64 },

    /// The mark belongs to an older log generation; nothing was touched
    StaleMark,
}

#[derive(Debug)]
struct AofInner {
    file: BufWriter<File>,

    /// Bytes accepted into the current file, buffered or not
    written: u64,

    /// Bytes known to be fsynced
    synced: u64,

    generation: u64,
    closed: bool,

    #[cfg(test)]
    fail_syncs: bool,
}

impl AofInner {
    fn new(file: File, len: u64, generation: u64) -> Self {
        Self {
            file: BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
            written: len,
            synced: len,
            generation,
            closed: false,
            #[cfg(test)]
            fail_syncs: false,
        }
    }

    /// Flushes the buffer and fsyncs everything written so far.
    fn sync_written(&mut self) -> io::Result<()> {
        self.file.flush()?;
        #[cfg(test)]
        if self.fail_syncs {
            return Err(io::Error::other("fsync disabled by test"));
        }
        self.file.get_ref().sync_data()?;
        self.synced = self.written;
        Ok(())
    }
}

/// The append-only log writer.
///
/// All methods take `&self`; an internal mutex serializes concurrent callers
/// so the file is a total order of the records written.
#[derive(Debug)]
pub struct AofWriter {
    path: PathBuf,
    policy: FsyncPolicy,
    inner: Mutex<AofInner>,
}

impl AofWriter {
    /// Opens (or creates) the log at `path` for appending.
    pub fn open(path: impl AsRef<Path>, policy: FsyncPolicy) -> Result<Self, AofError> {
        Self::open_inner(path.as_ref(), policy, None)
    }

    /// Opens the log after cutting it back to `valid_len` bytes.
    ///
    /// `valid_len` is the end of the last complete record found by replay.
    /// Anything past it is a torn append; left in place, the next record
    /// would be glued onto it.
    pub fn open_truncated(
        path: impl AsRef<Path>,
        policy: FsyncPolicy,
        valid_len: u64,
    ) -> Result<Self, AofError> {
        Self::open_inner(path.as_ref(), policy, Some(valid_len))
    }

    fn open_inner(path: &Path, policy: FsyncPolicy, valid_len: Option<u64>) -> Result<Self, AofError> {
        let path = path.to_path_buf();
        let file = open_append(&path)?;
        let mut len = file.metadata()?.len();

        if let Some(valid_len) = valid_len.filter(|&valid| valid < len) {
            warn!(
                path = %path.display(),
                discarded = len - valid_len,
                "Truncating torn tail of AOF"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
            len = valid_len;
        }

        info!(path = %path.display(), bytes = len, policy = %policy, "AOF opened");

        Ok(Self {
            path,
            policy,
            inner: Mutex::new(AofInner::new(file, len, 0)),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The configured fsync policy.
    pub fn policy(&self) -> FsyncPolicy {
        self.policy
    }

    /// Makes every later fsync fail until reset.
    #[cfg(test)]
    pub(crate) fn fail_syncs(&self, fail: bool) {
        self.inner.lock().fail_syncs = fail;
    }

    /// Durably records one mutation according to the fsync policy.
    ///
    /// Under `always` the record is flushed and fsynced before this returns.
    pub fn append(&self, record: &Record) -> Result<(), AofError> {
        let offset = self.write(record)?;
        self.commit(offset)
    }

    /// Buffers one record and returns the log offset just past it.
    ///
    /// This never fsyncs, so it is cheap enough to call while holding a
    /// shard lock. Pair it with [`AofWriter::commit`].
    pub fn write(&self, record: &Record) -> Result<u64, AofError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(AofError::Closed);
        }

        let len = record.write_to(&mut inner.file)?;
        inner.written += len as u64;
        Ok(inner.written)
    }

    /// Makes a write durable per the policy.
    ///
    /// Under `always` this fsyncs through `offset`. One fsync covers every
    /// record written before it, so concurrent committers often find their
    /// record already synced.
    pub fn commit(&self, offset: u64) -> Result<(), AofError> {
        match self.policy {
            FsyncPolicy::Always => self.sync_through(offset),
            FsyncPolicy::EverySec | FsyncPolicy::Off => Ok(()),
        }
    }

    fn sync_through(&self, offset: u64) -> Result<(), AofError> {
        let mut inner = self.inner.lock();
        if inner.synced >= offset {
            return Ok(());
        }
        if inner.closed {
            return Err(AofError::Closed);
        }

        inner.sync_written()?;
        Ok(())
    }

    /// Flushes buffered records to the OS and fsyncs them.
    ///
    /// A closed writer has nothing left to sync, so this is a no-op.
    pub fn sync(&self) -> Result<(), AofError> {
        let mut inner = self.inner.lock();
        if inner.closed || inner.synced == inner.written {
            return Ok(());
        }

        inner.sync_written()?;
        Ok(())
    }

    /// Flushes buffered records to the OS without fsyncing.
    pub fn flush(&self) -> Result<(), AofError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        inner.file.flush()?;
        Ok(())
    }

    /// Current end of the log.
    pub fn mark(&self) -> LogMark {
        let inner = self.inner.lock();
        LogMark {
            generation: inner.generation,
            offset: inner.written,
        }
    }

    /// Bytes accepted into the current log file.
    pub fn len(&self) -> u64 {
        self.inner.lock().written
    }

    /// Returns true if the current log file holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Truncates the log to empty.
    ///
    /// Runs entirely under the writer lock: pending data is flushed, the old
    /// file is closed and the same path is truncated and reopened. No append
    /// can interleave with a partial rotation.
    pub fn rotate(&self) -> Result<(), AofError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        self.truncate_locked(&mut inner)
    }

    fn truncate_locked(&self, inner: &mut AofInner) -> Result<(), AofError> {
        inner.file.flush()?;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.sync_all()?;

        inner.file = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
        inner.written = 0;
        inner.synced = 0;
        inner.generation += 1;

        debug!(path = %self.path.display(), "AOF rotated");
        Ok(())
    }

    /// Drops the part of the log that precedes `mark`.
    ///
    /// Records appended after the mark are copied into a fresh file that
    /// atomically replaces the log. When nothing was appended since the mark
    /// this is a plain [`AofWriter::rotate`].
    ///
    /// The replacement is opened before the rename, so once the rename has
    /// happened nothing can fail that would leave the writer on the unlinked
    /// old file.
    pub fn compact_to(&self, mark: LogMark) -> Result<Compaction, AofError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(AofError::Closed);
        }
        if mark.generation != inner.generation || mark.offset > inner.written {
            return Ok(Compaction::StaleMark);
        }

        if mark.offset == inner.written {
            self.truncate_locked(&mut inner)?;
            return Ok(Compaction::Truncated);
        }

        inner.file.flush()?;

        let tmp_path = tmp_path_for(&self.path);
        let staged = copy_tail(&self.path, &tmp_path, mark.offset)
            .and_then(|staged| fs::rename(&tmp_path, &self.path).map(|()| staged));
        let (file, kept) = match staged {
            Ok(staged) => staged,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e.into());
            }
        };

        let generation = inner.generation + 1;
        *inner = AofInner::new(file, kept, generation);
        sync_parent_dir(&self.path);

        debug!(
            path = %self.path.display(),
            dropped = mark.offset,
            kept = kept,
            "AOF compacted"
        );
        Ok(Compaction::Retained {
            dropped: mark.offset,
            kept,
        })
    }

    /// Flushes, fsyncs and closes the log. Further appends fail.
    ///
    /// Calling this more than once is harmless.
    pub fn close(&self) -> Result<(), AofError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        inner.file.flush()?;
        inner.file.get_ref().sync_all()?;
        inner.synced = inner.written;

        info!(path = %self.path.display(), bytes = inner.written, "AOF closed");
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Copies `src[from..]` into a new file at `dst`, fsyncs it, and returns
/// `dst` reopened for appending along with the bytes copied.
fn copy_tail(src: &Path, dst: &Path, from: u64) -> io::Result<(File, u64)> {
    let mut reader = File::open(src)?;
    reader.seek(SeekFrom::Start(from))?;

    let mut out = BufWriter::new(File::create(dst)?);
    let kept = io::copy(&mut reader, &mut out)?;
    let out = out.into_inner().map_err(|e| e.into_error())?;
    out.sync_all()?;

    Ok((open_append(dst)?, kept))
}

/// A handle to the running background flusher.
///
/// When this handle is dropped, the flusher task will be stopped.
#[derive(Debug)]
pub struct AofFlusher {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl AofFlusher {
    /// Starts flushing `aof` every `interval` as a background task.
    pub fn start(aof: Arc<AofWriter>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(flusher_loop(aof, interval, shutdown_rx));

        info!(interval_ms = interval.as_millis() as u64, "AOF flusher started");

        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Signals the flusher to stop after its current tick.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stops the flusher and waits for the task to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!("AOF flusher stopped");
    }
}

impl Drop for AofFlusher {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn flusher_loop(aof: Arc<AofWriter>, period: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("AOF flusher received shutdown signal");
                    return;
                }
            }
        }

        let writer = Arc::clone(&aof);
        let outcome = tokio::task::spawn_blocking(move || match writer.policy() {
            FsyncPolicy::Off => writer.flush(),
            FsyncPolicy::EverySec | FsyncPolicy::Always => writer.sync(),
        })
        .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Background AOF fsync failed"),
            Err(e) => warn!(error = %e, "Background AOF fsync task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn aof_in(dir: &TempDir, policy: FsyncPolicy) -> (AofWriter, PathBuf) {
        let path = dir.path().join("test.aof");
        (AofWriter::open(&path, policy).unwrap(), path)
    }

    #[test]
    fn test_append_always_is_on_disk_immediately() {
        let dir = TempDir::new().unwrap();
        let (aof, path) = aof_in(&dir, FsyncPolicy::Always);

        aof.append(&Record::set("foo", "bar")).unwrap();
        aof.append(&Record::del("foo")).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"SET foo bar\nDEL foo\n");
    }

    #[test]
    fn test_append_everysec_buffers_until_sync() {
        let dir = TempDir::new().unwrap();
        let (aof, path) = aof_in(&dir, FsyncPolicy::EverySec);

        aof.append(&Record::set("foo", "bar")).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"");

        aof.sync().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"SET foo bar\n");
    }

    #[test]
    fn test_reopen_appends_to_existing_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.aof");

        {
            let aof = AofWriter::open(&path, FsyncPolicy::Always).unwrap();
            aof.append(&Record::set("a", "1")).unwrap();
            aof.close().unwrap();
        }

        let aof = AofWriter::open(&path, FsyncPolicy::Always).unwrap();
        assert_eq!(aof.len(), 8);
        aof.append(&Record::set("b", "2")).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"SET a 1\nSET b 2\n");
    }

    #[test]
    fn test_open_truncated_drops_torn_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.aof");
        fs::write(&path, b"SET a 1\nSET b tor").unwrap();

        let aof = AofWriter::open_truncated(&path, FsyncPolicy::Always, 8).unwrap();
        assert_eq!(aof.len(), 8);
        aof.append(&Record::set("c", "3")).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"SET a 1\nSET c 3\n");
    }

    #[test]
    fn test_open_truncated_keeps_complete_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.aof");
        fs::write(&path, b"SET a 1\n").unwrap();

        let aof = AofWriter::open_truncated(&path, FsyncPolicy::Always, 8).unwrap();
        assert_eq!(aof.len(), 8);
        assert_eq!(fs::read(&path).unwrap(), b"SET a 1\n");
    }

    #[test]
    fn test_off_buffers_and_never_fsyncs() {
        let dir = TempDir::new().unwrap();
        let (aof, path) = aof_in(&dir, FsyncPolicy::Off);
        aof.fail_syncs(true);

        let offset = aof.write(&Record::set("a", "1")).unwrap();
        aof.commit(offset).unwrap();
        aof.append(&Record::del("a")).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"");

        aof.flush().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"SET a 1\nDEL a\n");
        assert_eq!(aof.inner.lock().synced, 0);
    }

    #[test]
    fn test_always_commit_reports_fsync_failure() {
        let dir = TempDir::new().unwrap();
        let (aof, _) = aof_in(&dir, FsyncPolicy::Always);

        aof.fail_syncs(true);
        assert!(matches!(aof.append(&Record::set("a", "1")), Err(AofError::Io(_))));

        // The next successful fsync covers the earlier record too.
        aof.fail_syncs(false);
        aof.append(&Record::set("b", "2")).unwrap();
        assert_eq!(aof.inner.lock().synced, 16);
    }

    #[test]
    fn test_write_returns_end_offsets() {
        let dir = TempDir::new().unwrap();
        let (aof, _) = aof_in(&dir, FsyncPolicy::EverySec);

        assert_eq!(aof.write(&Record::set("a", "1")).unwrap(), 8);
        assert_eq!(aof.write(&Record::del("a")).unwrap(), 14);
        assert_eq!(aof.mark().offset(), 14);
    }

    #[test]
    fn test_rotate_truncates_to_empty() {
        let dir = TempDir::new().unwrap();
        let (aof, path) = aof_in(&dir, FsyncPolicy::EverySec);

        aof.append(&Record::set("a", "1")).unwrap();
        aof.rotate().unwrap();
        assert!(aof.is_empty());
        assert_eq!(fs::read(&path).unwrap(), b"");

        aof.append(&Record::set("b", "2")).unwrap();
        aof.sync().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"SET b 2\n");
    }

    #[test]
    fn test_compact_to_keeps_records_after_mark() {
        let dir = TempDir::new().unwrap();
        let (aof, path) = aof_in(&dir, FsyncPolicy::EverySec);

        aof.append(&Record::set("a", "1")).unwrap();
        aof.append(&Record::set("b", "2")).unwrap();
        let mark = aof.mark();
        aof.append(&Record::set("c", "3")).unwrap();
        aof.append(&Record::del("a")).unwrap();

        let outcome = aof.compact_to(mark).unwrap();
        assert_eq!(outcome, Compaction::Retained { dropped: 16, kept: 14 });
        assert_eq!(fs::read(&path).unwrap(), b"SET c 3\nDEL a\n");
        assert!(!tmp_path_for(&path).exists());

        // Appends continue after the kept tail.
        aof.append(&Record::set("d", "4")).unwrap();
        aof.sync().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"SET c 3\nDEL a\nSET d 4\n");
        assert_eq!(aof.len(), 22);
    }

    #[cfg(unix)]
    #[test]
    fn test_compact_to_writes_through_the_live_path() {
        use std::os::unix::fs::MetadataExt;

        let dir = TempDir::new().unwrap();
        let (aof, path) = aof_in(&dir, FsyncPolicy::EverySec);

        aof.append(&Record::set("a", "1")).unwrap();
        let mark = aof.mark();
        aof.append(&Record::set("b", "2")).unwrap();
        aof.compact_to(mark).unwrap();

        let handle_ino = aof.inner.lock().file.get_ref().metadata().unwrap().ino();
        assert_eq!(handle_ino, fs::metadata(&path).unwrap().ino());
    }

    #[test]
    fn test_failed_compaction_keeps_appending_to_log() {
        let dir = TempDir::new().unwrap();
        let (aof, path) = aof_in(&dir, FsyncPolicy::Always);

        aof.append(&Record::set("a", "1")).unwrap();
        let mark = aof.mark();
        aof.append(&Record::set("b", "2")).unwrap();

        // A directory squatting on the temp path makes the tail copy fail.
        fs::create_dir(tmp_path_for(&path)).unwrap();
        assert!(matches!(aof.compact_to(mark), Err(AofError::Io(_))));

        aof.append(&Record::set("c", "3")).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"SET a 1\nSET b 2\nSET c 3\n");
        assert_eq!(aof.len(), 24);
    }

    #[test]
    fn test_compact_to_end_truncates() {
        let dir = TempDir::new().unwrap();
        let (aof, path) = aof_in(&dir, FsyncPolicy::EverySec);

        aof.append(&Record::set("a", "1")).unwrap();
        let mark = aof.mark();

        assert_eq!(aof.compact_to(mark).unwrap(), Compaction::Truncated);
        assert_eq!(fs::read(&path).unwrap(), b"");
    }

    #[test]
    fn test_compact_to_refuses_stale_mark() {
        let dir = TempDir::new().unwrap();
        let (aof, path) = aof_in(&dir, FsyncPolicy::Always);

        aof.append(&Record::set("a", "1")).unwrap();
        let stale = aof.mark();
        aof.rotate().unwrap();
        aof.append(&Record::set("b", "2")).unwrap();
        aof.append(&Record::set("c", "3")).unwrap();

        assert_eq!(aof.compact_to(stale).unwrap(), Compaction::StaleMark);
        assert_eq!(fs::read(&path).unwrap(), b"SET b 2\nSET c 3\n");
    }

    #[test]
    fn test_close_flushes_and_rejects_appends() {
        let dir = TempDir::new().unwrap();
        let (aof, path) = aof_in(&dir, FsyncPolicy::EverySec);

        aof.append(&Record::set("a", "1")).unwrap();
        aof.close().unwrap();
        aof.close().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"SET a 1\n");
        assert!(matches!(
            aof.append(&Record::set("b", "2")),
            Err(AofError::Closed)
        ));
        assert!(aof.sync().is_ok());
    }

    #[test]
    fn test_open_fails_for_missing_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("test.aof");
        assert!(matches!(
            AofWriter::open(&path, FsyncPolicy::Always),
            Err(AofError::Io(_))
        ));
    }

    #[test]
    fn test_concurrent_appends_are_whole_lines() {
        let dir = TempDir::new().unwrap();
        let (aof, path) = aof_in(&dir, FsyncPolicy::EverySec);
        let aof = Arc::new(aof);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let aof = Arc::clone(&aof);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        aof.append(&Record::set(format!("k{}-{}", t, i), "v")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        aof.sync().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 800);
        assert!(contents.lines().all(|l| l.starts_with("SET k") && l.ends_with(" v")));
    }

    #[tokio::test]
    async fn test_flusher_syncs_in_background() {
        let dir = TempDir::new().unwrap();
        let (aof, path) = aof_in(&dir, FsyncPolicy::EverySec);
        let aof = Arc::new(aof);

        let flusher = AofFlusher::start(Arc::clone(&aof), Duration::from_millis(20));
        aof.append(&Record::set("a", "1")).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fs::read(&path).unwrap(), b"SET a 1\n");

        flusher.shutdown().await;
    }

    #[tokio::test]
    async fn test_flusher_under_off_writes_without_fsync() {
        let dir = TempDir::new().unwrap();
        let (aof, path) = aof_in(&dir, FsyncPolicy::Off);
        let aof = Arc::new(aof);
        aof.fail_syncs(true);

        let flusher = AofFlusher::start(Arc::clone(&aof), Duration::from_millis(20));
        aof.append(&Record::set("a", "1")).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fs::read(&path).unwrap(), b"SET a 1\n");
        assert_eq!(aof.inner.lock().synced, 0);

        flusher.shutdown().await;
    }

    #[tokio::test]
    async fn test_flusher_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let (aof, path) = aof_in(&dir, FsyncPolicy::EverySec);
        let aof = Arc::new(aof);

        let flusher = AofFlusher::start(Arc::clone(&aof), Duration::from_millis(10));
        flusher.shutdown().await;

        aof.append(&Record::set("a", "1")).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Nothing flushes the buffer once the task is gone.
        assert_eq!(fs::read(&path).unwrap(), b"");
    }
}
