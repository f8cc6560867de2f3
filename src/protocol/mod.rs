//! Line Protocol Implementation
//!
//! A deliberately small text protocol: one command per line, one reply line
//! per command.
//!
//! ## Modules
//!
//! - `types`: [`Command`] and [`Reply`] with reply serialization
//! - `parser`: line framing and command parsing
//!
//! ## Example
//!
//! ```
//! use stashkv::protocol::{parse_line, Command, Reply};
//! use bytes::Bytes;
//!
//! let command = parse_line(b"GET name").unwrap().unwrap();
//! assert_eq!(command, Command::Get { key: Bytes::from("name") });
//!
//! assert_eq!(Reply::Value(Bytes::from("stash")).serialize(), b"$stash\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_line, split_line, ParseError, ParseResult, MAX_LINE_LEN};
pub use types::{Command, Reply};
