//! Append-Only Log Record Format
//!
//! Every mutation is stored as exactly one text line:
//!
//! ```text
//! SET <escaped-key> <escaped-value>\n
//! DEL <escaped-key>\n
//! ```
//!
//! ## Escaping
//!
//! | Byte        | Key    | Value  |
//! |-------------|--------|--------|
//! | `\`         | `\\`   | `\\`   |
//! | newline     | `\n`   | `\n`   |
//! | carriage rt | `\r`   | `\r`   |
//! | space       | `\s`   | as-is  |
//!
//! The key is a single space-free field. The value is everything after the
//! key's trailing space up to the newline, so runs of spaces inside a value
//! survive exactly.

use bytes::Bytes;
use std::io::{self, Write};
use thiserror::Error;

/// A single mutation stored in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Set { key: Bytes, value: Bytes },
    Del { key: Bytes },
}

/// Why a log line could not be decoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("unknown command")]
    UnknownCommand,

    #[error("wrong number of fields")]
    WrongFieldCount,

    #[error("invalid escape sequence")]
    BadEscape,
}

impl Record {
    /// Creates a SET record.
    pub fn set(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Record::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Creates a DEL record.
    pub fn del(key: impl Into<Bytes>) -> Self {
        Record::Del { key: key.into() }
    }

    /// The key this record mutates.
    pub fn key(&self) -> &Bytes {
        match self {
            Record::Set { key, .. } | Record::Del { key } => key,
        }
    }

    /// Encodes the record as one newline-terminated line.
    pub fn encode(&self) -> Vec<u8> {
        let mut line = Vec::with_capacity(self.encoded_len_hint());
        match self {
            Record::Set { key, value } => {
                line.extend_from_slice(b"SET ");
                escape_into(key, true, &mut line);
                line.push(b' ');
                escape_into(value, false, &mut line);
            }
            Record::Del { key } => {
                line.extend_from_slice(b"DEL ");
                escape_into(key, true, &mut line);
            }
        }
        line.push(b'\n');
        line
    }

    /// Writes the encoded line to `w`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<usize> {
        let line = self.encode();
        w.write_all(&line)?;
        Ok(line.len())
    }

    /// Decodes one line, without its trailing newline.
    ///
    /// A trailing `\r` is part of the content; the writer escapes carriage
    /// returns, so a raw one only appears in hand-edited files.
    pub fn decode(line: &[u8]) -> Result<Self, RecordError> {
        let (command, rest) = split_field(line).ok_or(RecordError::WrongFieldCount)?;

        if command.eq_ignore_ascii_case(b"SET") {
            let rest = rest.ok_or(RecordError::WrongFieldCount)?;
            let (key, value) = split_field(rest).ok_or(RecordError::WrongFieldCount)?;
            let value = value.ok_or(RecordError::WrongFieldCount)?;
            Ok(Record::Set {
                key: unescape(key)?,
                value: unescape(value)?,
            })
        } else if command.eq_ignore_ascii_case(b"DEL") {
            let key = rest.ok_or(RecordError::WrongFieldCount)?;
            if key.contains(&b' ') {
                return Err(RecordError::WrongFieldCount);
            }
            Ok(Record::Del {
                key: unescape(key)?,
            })
        } else {
            Err(RecordError::UnknownCommand)
        }
    }

    fn encoded_len_hint(&self) -> usize {
        match self {
            Record::Set { key, value } => 6 + key.len() + value.len(),
            Record::Del { key } => 5 + key.len(),
        }
    }
}

/// Splits at the first space: `(field, Some(rest))`, or `(line, None)` if
/// there is no space. Returns `None` for an empty line.
fn split_field(line: &[u8]) -> Option<(&[u8], Option<&[u8]>)> {
    if line.is_empty() {
        return None;
    }
    match line.iter().position(|&b| b == b' ') {
        Some(pos) => Some((&line[..pos], Some(&line[pos + 1..]))),
        None => Some((line, None)),
    }
}

fn escape_into(raw: &[u8], is_key: bool, out: &mut Vec<u8>) {
    for &byte in raw {
        match byte {
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b' ' if is_key => out.extend_from_slice(b"\\s"),
            _ => out.push(byte),
        }
    }
}

/// Reverses the field escaping, including the key-only `\s`.
pub fn unescape(field: &[u8]) -> Result<Bytes, RecordError> {
    if !field.contains(&b'\\') {
        return Ok(Bytes::copy_from_slice(field));
    }

    let mut out = Vec::with_capacity(field.len());
    let mut bytes = field.iter();
    while let Some(&byte) = bytes.next() {
        if byte != b'\\' {
            out.push(byte);
            continue;
        }
        match bytes.next() {
            Some(b'\\') => out.push(b'\\'),
            Some(b'n') => out.push(b'\n'),
            Some(b'r') => out.push(b'\r'),
            Some(b's') => out.push(b' '),
            _ => return Err(RecordError::BadEscape),
        }
    }
    Ok(Bytes::from(out))
}
