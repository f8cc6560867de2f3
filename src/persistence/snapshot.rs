//! Binary Snapshots
//!
//! A snapshot is the full store serialized at one instant:
//!
//! ```text
//! ┌────────┬──────────────┬─────┬──────────────┬───────┬─────┐
//! │ "KVS1" │ uvarint klen │ key │ uvarint vlen │ value │ ... │  EOF
//! └────────┴──────────────┴─────┴──────────────┴───────┴─────┘
//! ```
//!
//! Lengths are unsigned LEB128 varints. The file ends exactly on a record
//! boundary; anything else is a [`SnapshotError::Truncated`] snapshot.
//!
//! [`save`] writes to `<path>.tmp`, fsyncs and renames, so the canonical path
//! only ever holds a complete snapshot.

use crate::persistence::{sync_parent_dir, tmp_path_for};
use crate::storage::Store;
use bytes::Bytes;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Snapshot file header.
pub const MAGIC: &[u8; 4] = b"KVS1";

/// A u64 varint never needs more than 10 bytes.
pub const MAX_VARINT_LEN: usize = 10;

/// Errors raised while saving or loading a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid snapshot header")]
    BadMagic,

    #[error("snapshot truncated inside record {record}")]
    Truncated { record: u64 },

    #[error("snapshot length varint overflows u64 in record {record}")]
    VarintOverflow { record: u64 },
}

/// Something that can append one length-prefixed key/value record.
///
/// [`save`] streams the store through this; tests and tools can plug in
/// their own sinks.
pub trait RecordSink {
    fn write_record(&mut self, key: &[u8], value: &[u8]) -> io::Result<()>;
}

/// Writes the snapshot encoding to any [`Write`].
#[derive(Debug)]
pub struct SnapshotWriter<W: Write> {
    inner: W,
    records: u64,
}

impl<W: Write> SnapshotWriter<W> {
    /// Writes the magic header and returns a writer ready for records.
    pub fn new(mut inner: W) -> io::Result<Self> {
        inner.write_all(MAGIC)?;
        Ok(Self { inner, records: 0 })
    }

    /// Number of records written so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Flushes and returns the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> RecordSink for SnapshotWriter<W> {
    fn write_record(&mut self, key: &[u8], value: &[u8]) -> io::Result<()> {
        let mut len = [0u8; MAX_VARINT_LEN];

        let n = encode_varint(key.len() as u64, &mut len);
        self.inner.write_all(&len[..n])?;
        self.inner.write_all(key)?;

        let n = encode_varint(value.len() as u64, &mut len);
        self.inner.write_all(&len[..n])?;
        self.inner.write_all(value)?;

        self.records += 1;
        Ok(())
    }
}

/// Encodes `value` as an unsigned LEB128 varint into `buf`, returning the
/// number of bytes used.
pub fn encode_varint(mut value: u64, buf: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut i = 0;
    while value >= 0x80 {
        buf[i] = (value as u8) | 0x80;
        value >>= 7;
        i += 1;
    }
    buf[i] = value as u8;
    i + 1
}

enum Varint {
    Value(u64),
    /// Clean end of input before the first byte
    Eof,
}

/// Reads a varint. EOF before the first byte is reported as [`Varint::Eof`];
/// EOF in the middle of one means the record was cut short.
fn read_varint<R: Read>(reader: &mut R, record: u64) -> Result<Varint, SnapshotError> {
    let mut value = 0u64;
    let mut byte = [0u8; 1];

    for i in 0..MAX_VARINT_LEN {
        match reader.read_exact(&mut byte) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return if i == 0 {
                    Ok(Varint::Eof)
                } else {
                    Err(SnapshotError::Truncated { record })
                };
            }
            Err(e) => return Err(e.into()),
        }

        let bits = (byte[0] & 0x7f) as u64;
        if i == MAX_VARINT_LEN - 1 && byte[0] > 1 {
            return Err(SnapshotError::VarintOverflow { record });
        }
        value |= bits << (7 * i);
        if byte[0] & 0x80 == 0 {
            return Ok(Varint::Value(value));
        }
    }

    Err(SnapshotError::VarintOverflow { record })
}

/// Summary of a completed [`save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveStats {
    pub records: u64,
    pub bytes: u64,
}

/// Writes every entry of `store` to a snapshot at `path`.
///
/// On failure the temp file is removed and any previous snapshot at `path`
/// is left untouched.
pub fn save(path: impl AsRef<Path>, store: &Store) -> Result<SaveStats, SnapshotError> {
    let path = path.as_ref();
    let tmp = tmp_path_for(path);

    match write_tmp(&tmp, store) {
        Ok(stats) => {
            if let Err(e) = fs::rename(&tmp, path) {
                let _ = fs::remove_file(&tmp);
                return Err(e.into());
            }
            sync_parent_dir(path);

            info!(
                path = %path.display(),
                records = stats.records,
                bytes = stats.bytes,
                "Snapshot saved"
            );
            Ok(stats)
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

fn write_tmp(tmp: &Path, store: &Store) -> Result<SaveStats, SnapshotError> {
    let file = File::create(tmp)?;
    let mut writer = SnapshotWriter::new(BufWriter::new(file))?;

    store.try_for_each(|key, value| writer.write_record(key, value))?;

    let records = writer.records();
    let file = writer
        .finish()?
        .into_inner()
        .map_err(|e| e.into_error())?;
    file.sync_all()?;
    let bytes = file.metadata()?.len();

    Ok(SaveStats { records, bytes })
}

/// Summary of a completed [`load`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub records: u64,
}

/// Populates `store` from the snapshot at `path`.
///
/// A missing file loads nothing. Existing keys in `store` are overwritten by
/// keys in the snapshot.
pub fn load(path: impl AsRef<Path>, store: &Store) -> Result<LoadStats, SnapshotError> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No snapshot to load");
            return Ok(LoadStats::default());
        }
        Err(e) => return Err(e.into()),
    };
    let size = file.metadata()?.len();

    let stats = load_from(BufReader::new(file), size, store)?;
    info!(path = %path.display(), records = stats.records, "Snapshot loaded");
    Ok(stats)
}

/// Loads snapshot records from `reader`, which holds `size` bytes in total.
///
/// `size` bounds every length prefix, so a corrupt length cannot trigger a
/// huge allocation.
pub fn load_from<R: Read>(mut reader: R, size: u64, store: &Store) -> Result<LoadStats, SnapshotError> {
    let mut header = [0u8; MAGIC.len()];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(SnapshotError::BadMagic),
        Err(e) => return Err(e.into()),
    }
    if &header != MAGIC {
        return Err(SnapshotError::BadMagic);
    }

    let mut remaining = size.saturating_sub(MAGIC.len() as u64);
    let mut records = 0u64;

    loop {
        let key = match read_varint(&mut reader, records)? {
            Varint::Eof => break,
            Varint::Value(len) => read_field(&mut reader, len, &mut remaining, records)?,
        };
        let value = match read_varint(&mut reader, records)? {
            Varint::Eof => return Err(SnapshotError::Truncated { record: records }),
            Varint::Value(len) => read_field(&mut reader, len, &mut remaining, records)?,
        };

        store.set(key, value);
        records += 1;
    }

    Ok(LoadStats { records })
}

fn read_field<R: Read>(
    reader: &mut R,
    len: u64,
    remaining: &mut u64,
    record: u64,
) -> Result<Bytes, SnapshotError> {
    if len > *remaining {
        return Err(SnapshotError::Truncated { record });
    }

    let mut buf = vec![0u8; len as usize];
    match reader.read_exact(&mut buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(SnapshotError::Truncated { record })
        }
        Err(e) => return Err(e.into()),
    }
    *remaining -= len;
    Ok(Bytes::from(buf))
}
