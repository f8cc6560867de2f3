//! AOF Replay
//!
//! Re-applies a log written by [`AofWriter`](super::aof::AofWriter) to a
//! [`Store`], in file order. Replay only touches the store through `set` and
//! `del`, so replaying the same log twice leaves the same final state.
//!
//! Lines that do not decode are skipped rather than aborting recovery. A
//! final line without its newline is a torn append from a crash and is
//! skipped too, since the writer always terminates its records.

use crate::persistence::record::Record;
use crate::storage::Store;
use bytes::Bytes;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info, warn};

/// Outcome of a replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records applied to the store
    pub applied: u64,

    /// Malformed or torn lines that were ignored
    pub skipped: u64,

    /// Bytes up to the end of the last complete line; a torn tail starts here
    pub valid_len: u64,
}

/// Applies a single record to the store.
pub fn apply(store: &Store, record: Record) {
    match record {
        Record::Set { key, value } => store.set(key, value),
        Record::Del { key } => {
            store.del(&key);
        }
    }
}

/// Replays the log at `path` into `store`.
///
/// A missing file is a fresh start and replays nothing.
pub fn replay(path: impl AsRef<Path>, store: &Store) -> io::Result<ReplayStats> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No AOF to replay");
            return Ok(ReplayStats::default());
        }
        Err(e) => return Err(e),
    };

    let stats = replay_from(BufReader::new(file), store)?;
    info!(
        path = %path.display(),
        applied = stats.applied,
        skipped = stats.skipped,
        "AOF replayed"
    );
    Ok(stats)
}

/// Replays log lines from any buffered reader.
pub fn replay_from<R: BufRead>(mut reader: R, store: &Store) -> io::Result<ReplayStats> {
    let mut stats = ReplayStats::default();
    let mut line = Vec::new();
    let mut line_no = 0u64;

    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line)?;
        if read == 0 {
            break;
        }
        line_no += 1;

        let Some(body) = line.strip_suffix(b"\n") else {
            warn!(line = line_no, bytes = line.len(), "Skipping torn final AOF record");
            stats.skipped += 1;
            break;
        };
        stats.valid_len += read as u64;
        if body.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match Record::decode(body) {
            Ok(record) => {
                apply(store, record);
                stats.applied += 1;
            }
            Err(e) => {
                warn!(
                    line = line_no,
                    error = %e,
                    content = ?Bytes::copy_from_slice(body),
                    "Skipping malformed AOF record"
                );
                stats.skipped += 1;
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn replay_str(log: &str) -> (Store, ReplayStats) {
        let store = Store::new();
        let stats = replay_from(log.as_bytes(), &store).unwrap();
        (store, stats)
    }

    #[test]
    fn test_replay_set_then_del() {
        let (store, stats) = replay_str("SET a 1\nSET a 2\nDEL a\n");
        assert_eq!(store.get(b"a"), None);
        assert_eq!(
            stats,
            ReplayStats {
                applied: 3,
                skipped: 0,
                valid_len: 22
            }
        );
    }

    #[test]
    fn test_replay_last_write_wins() {
        let (store, _) = replay_str("SET a 1\nSET b 1\nSET a 2\nDEL b\nSET b 3\n");
        assert_eq!(store.get(b"a"), Some(Bytes::from("2")));
        assert_eq!(store.get(b"b"), Some(Bytes::from("3")));
    }

    #[test]
    fn test_replay_escaped_newline() {
        let (store, _) = replay_str("SET x hello\\nworld\n");
        assert_eq!(store.get(b"x"), Some(Bytes::from("hello\nworld")));
    }

    #[test]
    fn test_replay_value_with_spaces() {
        let (store, _) = replay_str("SET greeting hello big  world\n");
        assert_eq!(store.get(b"greeting"), Some(Bytes::from("hello big  world")));
    }

    #[test]
    fn test_replay_skips_malformed_lines() {
        let (store, stats) = replay_str("SET a 1\nSET onlykey\nBOGUS x\nDEL\nSET b 2\n");
        assert_eq!(store.get(b"a"), Some(Bytes::from("1")));
        assert_eq!(store.get(b"b"), Some(Bytes::from("2")));
        assert_eq!((stats.applied, stats.skipped), (2, 3));
        // Malformed lines are still complete lines.
        assert_eq!(stats.valid_len, 40);
    }

    #[test]
    fn test_replay_skips_torn_final_line() {
        let (store, stats) = replay_str("SET a 1\nSET b trunc");
        assert_eq!(store.get(b"a"), Some(Bytes::from("1")));
        assert_eq!(store.get(b"b"), None);
        assert_eq!(
            stats,
            ReplayStats {
                applied: 1,
                skipped: 1,
                valid_len: 8
            }
        );
    }

    #[test]
    fn test_replay_ignores_blank_lines() {
        let (store, stats) = replay_str("\nSET a 1\n\n");
        assert_eq!(store.len(), 1);
        assert_eq!(stats.skipped, 0);
        assert_eq!(stats.valid_len, 10);
    }

    #[test]
    fn test_replay_twice_is_idempotent() {
        let log = "SET a 1\nSET b 2\nDEL a\nSET c x y\nSET b 3\n";

        let once = Store::new();
        replay_from(log.as_bytes(), &once).unwrap();

        let twice = Store::new();
        replay_from(log.as_bytes(), &twice).unwrap();
        replay_from(log.as_bytes(), &twice).unwrap();

        for key in [&b"a"[..], b"b", b"c"] {
            assert_eq!(once.get(key), twice.get(key));
        }
        assert_eq!(once.len(), twice.len());
    }

    #[test]
    fn test_replay_missing_file_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = Store::new();
        let stats = replay(dir.path().join("absent.aof"), &store).unwrap();
        assert_eq!(stats, ReplayStats::default());
        assert!(store.is_empty());
    }

    #[test]
    fn test_replay_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.aof");
        fs::write(&path, b"SET k v\nDEL gone\n").unwrap();

        let store = Store::new();
        let stats = replay(&path, &store).unwrap();
        assert_eq!(stats.applied, 2);
        assert_eq!(store.get(b"k"), Some(Bytes::from("v")));
    }
}
