//! Line Protocol Parser
//!
//! One command per line. A line is split on ASCII whitespace; the first
//! field is the command name (case-insensitive) and the rest are arguments.
//!
//! ```text
//! SET greeting hello   world\r\n
//! └┬┘ └──┬───┘ └──────┬──────┘
//!  │     key     value = "hello world"
//!  command
//! ```
//!
//! SET joins every field after the key with single spaces, so runs of
//! whitespace inside a value collapse. GET and DEL take exactly one key.
//!
//! Framing (finding the end of a line in a stream) is done by
//! [`split_line`]; [`parse_line`] turns one complete line into a
//! [`Command`].

use crate::protocol::types::{Command, NEWLINE};
use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Longest accepted request line, newline excluded (4 MiB)
pub const MAX_LINE_LEN: usize = 4 * 1024 * 1024;

/// A request that could not be turned into a [`Command`].
///
/// The `Display` text is the message sent back after `-ERR `.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("SET needs key and value")]
    SetArity,

    #[error("GET needs key")]
    GetArity,

    #[error("DEL needs key")]
    DelArity,

    #[error("unknown command")]
    UnknownCommand,
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Removes the next complete line from `buffer`.
///
/// Returns the line without its `\n` (a trailing `\r` is left in place and
/// treated as whitespace by [`parse_line`]), or `None` if no newline has
/// arrived yet.
pub fn split_line(buffer: &mut BytesMut) -> Option<BytesMut> {
    let end = buffer.iter().position(|&b| b == NEWLINE)?;
    let mut line = buffer.split_to(end + 1);
    line.truncate(end);
    Some(line)
}

/// Parses one request line.
///
/// Returns `Ok(None)` for a blank line.
pub fn parse_line(line: &[u8]) -> ParseResult<Option<Command>> {
    let mut fields = line
        .split(u8::is_ascii_whitespace)
        .filter(|field| !field.is_empty());

    let Some(name) = fields.next() else {
        return Ok(None);
    };
    let args: Vec<&[u8]> = fields.collect();

    let command = if name.eq_ignore_ascii_case(b"PING") {
        Command::Ping
    } else if name.eq_ignore_ascii_case(b"SET") {
        let [key, value @ ..] = args.as_slice() else {
            return Err(ParseError::SetArity);
        };
        if value.is_empty() {
            return Err(ParseError::SetArity);
        }
        Command::Set {
            key: Bytes::copy_from_slice(key),
            value: Bytes::from(value.join(&b' ')),
        }
    } else if name.eq_ignore_ascii_case(b"GET") {
        let [key] = args.as_slice() else {
            return Err(ParseError::GetArity);
        };
        Command::Get {
            key: Bytes::copy_from_slice(key),
        }
    } else if name.eq_ignore_ascii_case(b"DEL") {
        let [key] = args.as_slice() else {
            return Err(ParseError::DelArity);
        };
        Command::Del {
            key: Bytes::copy_from_slice(key),
        }
    } else {
        return Err(ParseError::UnknownCommand);
    };

    Ok(Some(command))
}
