//! Server Configuration
//!
//! Every option can be given as a flag or through a `KV_*` environment
//! variable; a flag wins over the environment.
//!
//! | Flag                  | Env                    | Default          |
//! |-----------------------|------------------------|------------------|
//! | `--addr`              | `KV_ADDR`              | `0.0.0.0:6380`   |
//! | `--aof`               | `KV_AOF`               | `true`           |
//! | `--snapshot`          | `KV_SNAPSHOT`          | `true`           |
//! | `--fsync`             | `KV_FSYNC`             | `everysec`       |
//! | `--aof-path`          | `KV_AOF_PATH`          | `data.aof`       |
//! | `--snapshot-path`     | `KV_SNAPSHOT_PATH`     | `data.snap`      |
//! | `--snapshot-interval` | `KV_SNAPSHOT_INTERVAL` | `30` (seconds)   |
//! | `--shards`            | `KV_SHARDS`            | `64`             |
//!
//! Booleans accept `1/true/on/yes` and `0/false/off/no`.

use crate::persistence::{DurabilityOptions, FsyncPolicy};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

/// Address the server listens on by default: port 6380 on all interfaces
pub const DEFAULT_ADDR: &str = "0.0.0.0:6380";

/// StashKV Server
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "stashkv-server")]
#[command(about = "In-memory key-value server with AOF and snapshot persistence")]
#[command(version)]
pub struct ServerConfig {
    /// Listen address (host:port)
    #[arg(long, env = "KV_ADDR", default_value = DEFAULT_ADDR)]
    pub addr: String,

    /// Log every mutation to the append-only file
    #[arg(
        long,
        env = "KV_AOF",
        default_value = "true",
        value_parser = BoolishValueParser::new(),
        action = ArgAction::Set
    )]
    pub aof: bool,

    /// Load a snapshot at startup and save one periodically
    #[arg(
        long,
        env = "KV_SNAPSHOT",
        default_value = "true",
        value_parser = BoolishValueParser::new(),
        action = ArgAction::Set
    )]
    pub snapshot: bool,

    /// When AOF writes are fsynced
    #[arg(long, env = "KV_FSYNC", value_enum, default_value_t = FsyncPolicy::EverySec)]
    pub fsync: FsyncPolicy,

    /// Append-only file location
    #[arg(long, env = "KV_AOF_PATH", default_value = "data.aof")]
    pub aof_path: PathBuf,

    /// Snapshot file location
    #[arg(long, env = "KV_SNAPSHOT_PATH", default_value = "data.snap")]
    pub snapshot_path: PathBuf,

    /// Seconds between snapshots
    #[arg(
        long,
        env = "KV_SNAPSHOT_INTERVAL",
        default_value = "30",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub snapshot_interval: u64,

    /// Number of store shards (rounded up to a power of two)
    #[arg(
        long,
        env = "KV_SHARDS",
        default_value = "64",
        value_parser = clap::value_parser!(u32).range(1..=65536)
    )]
    pub shards: u32,
}

impl ServerConfig {
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval)
    }

    /// The persistence settings this configuration describes.
    pub fn durability(&self) -> DurabilityOptions {
        DurabilityOptions {
            aof_enabled: self.aof,
            snapshot_enabled: self.snapshot,
            fsync: self.fsync,
            aof_path: self.aof_path.clone(),
            snapshot_path: self.snapshot_path.clone(),
            snapshot_interval: self.snapshot_interval(),
            shards: self.shards as usize,
        }
    }
}
