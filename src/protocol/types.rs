//! Line Protocol Types
//!
//! Requests are single text lines; replies are single lines whose first byte
//! tells the client what kind of answer it is:
//!
//! - `+` Status (`+OK`, `+PONG`)
//! - `-` Error (`-ERR unknown command`)
//! - `:` Integer (`:1`)
//! - `$` Value, written raw up to the newline (`$bar`, or `$(nil)` when absent)
//!
//! Every reply ends with a single `\n`.

use bytes::Bytes;
use std::fmt;

/// Reply terminator
pub const NEWLINE: u8 = b'\n';

/// Reply type prefixes
pub mod prefix {
    pub const STATUS: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const VALUE: u8 = b'$';
}

/// Marker sent in place of a value for a missing key
pub const NIL: &[u8] = b"(nil)";

/// A parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Set { key: Bytes, value: Bytes },
    Get { key: Bytes },
    Del { key: Bytes },
}

impl Command {
    /// Name of the command, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping => "PING",
            Command::Set { .. } => "SET",
            Command::Get { .. } => "GET",
            Command::Del { .. } => "DEL",
        }
    }

    /// Returns true if executing the command can change the store.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Command::Set { .. } | Command::Del { .. })
    }
}

/// A reply sent back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Format: `+<status>\n`
    Status(&'static str),

    /// Format: `-<message>\n`
    Error(String),

    /// Format: `:<n>\n`
    Integer(i64),

    /// Format: `$<value>\n`
    Value(Bytes),

    /// Format: `$(nil)\n`
    Nil,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK")
    }

    pub fn pong() -> Self {
        Reply::Status("PONG")
    }

    /// Creates an error reply. The `ERR ` prefix is added here.
    pub fn error(message: impl fmt::Display) -> Self {
        Reply::Error(format!("ERR {message}"))
    }

    /// Serializes the reply to its wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_len());
        self.serialize_into(&mut buf);
        buf
    }

    /// Appends the wire format to `buf`.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Status(s) => {
                buf.push(prefix::STATUS);
                buf.extend_from_slice(s.as_bytes());
            }
            Reply::Error(msg) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(msg.as_bytes());
            }
            Reply::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
            }
            Reply::Value(data) => {
                buf.push(prefix::VALUE);
                buf.extend_from_slice(data);
            }
            Reply::Nil => {
                buf.push(prefix::VALUE);
                buf.extend_from_slice(NIL);
            }
        }
        buf.push(NEWLINE);
    }

    fn serialized_len(&self) -> usize {
        let body = match self {
            Reply::Status(s) => s.len(),
            Reply::Error(msg) => msg.len(),
            Reply::Integer(_) => 20,
            Reply::Value(data) => data.len(),
            Reply::Nil => NIL.len(),
        };
        body + 2
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Status(s) => write!(f, "{s}"),
            Reply::Error(msg) => write!(f, "(error) {msg}"),
            Reply::Integer(n) => write!(f, "(integer) {n}"),
            Reply::Value(data) => write!(f, "\"{}\"", String::from_utf8_lossy(data)),
            Reply::Nil => write!(f, "(nil)"),
        }
    }
}
