//! # StashKV - A Durable In-Memory Key-Value Store
//!
//! StashKV keeps every key in a sharded in-memory map and makes it survive
//! restarts with two files: an append-only log of mutations and a periodic
//! binary snapshot.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              StashKV                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                                               │                         │
//! │                                               ▼                         │
//! │                     ┌──────────────────────────────────────────────┐    │
//! │                     │  Db: Store (sharded map) + AofWriter         │    │
//! │                     └──────────────────────────────────────────────┘    │
//! │                                               ▲                         │
//! │                     ┌─────────────────────────┴───────────────────────┐ │
//! │                     │  AofFlusher (1s)      Snapshotter (interval)    │ │
//! │                     │          (Background Tokio Tasks)               │ │
//! │                     └─────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use stashkv::commands::CommandHandler;
//! use stashkv::connection::{accept_loop, ConnectionStats};
//! use stashkv::persistence::{Durability, DurabilityOptions};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (mut durability, _report) = Durability::open(DurabilityOptions::in_dir("./data"))?;
//!     durability.start_background();
//!
//!     let handler = CommandHandler::new(durability.db().clone());
//!     let listener = TcpListener::bind("127.0.0.1:6380").await?;
//!     accept_loop(listener, handler, Arc::new(ConnectionStats::new())).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`
//! - `SET key value...`
//! - `GET key`
//! - `DEL key`
//!
//! ## Module Overview
//!
//! - [`storage`]: Sharded in-memory map
//! - [`persistence`]: AOF, snapshots and startup recovery
//! - [`db`]: Store + log facade used by commands
//! - [`protocol`]: Line protocol parser and reply types
//! - [`commands`]: Command execution
//! - [`connection`]: Client connection management
//! - [`config`]: Flags and `KV_*` environment variables
//!
//! ## Durability
//!
//! A mutation is written to the log while its shard is locked, so the log
//! holds each key's mutations in the order the store applied them. How soon
//! the log reaches the disk depends on the [`FsyncPolicy`]: before the reply
//! (`always`), within a second (`everysec`), or when the OS decides (`off`).

pub mod commands;
pub mod config;
pub mod connection;
pub mod db;
pub mod persistence;
pub mod protocol;
pub mod storage;

pub use commands::CommandHandler;
pub use config::{ServerConfig, DEFAULT_ADDR};
pub use connection::{handle_connection, ConnectionStats};
pub use db::{Db, DbError};
pub use persistence::{Durability, DurabilityOptions, FsyncPolicy};
pub use protocol::{Command, ParseError, Reply};
pub use storage::Store;

/// Version of StashKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
