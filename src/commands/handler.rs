//! Command Handler
//!
//! Executes parsed [`Command`]s against the [`Db`] and builds the [`Reply`].
//!
//! | Command        | Reply                          |
//! |----------------|--------------------------------|
//! | `PING`         | `+PONG`                        |
//! | `SET key val`  | `+OK`                          |
//! | `GET key`      | `$<value>` or `$(nil)`         |
//! | `DEL key`      | `:1` if removed, `:0` if absent|
//!
//! A SET or DEL whose log write fails is not applied and replies
//! `-ERR persistence failure`. One that was applied but could not be
//! fsynced replies `-ERR persistence failure: applied but not durable`.

use crate::db::{Db, DbError};
use crate::protocol::{Command, Reply};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Message sent when a mutation could not be logged
pub const PERSISTENCE_FAILURE: &str = "persistence failure";

/// Message sent when a mutation was applied but its fsync failed
pub const NOT_DURABLE: &str = "persistence failure: applied but not durable";

/// Executes commands against a shared database.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    db: Db,

    /// Mutations whose log write or fsync failed
    persistence_failures: Arc<AtomicU64>,
}

impl CommandHandler {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            persistence_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Returns true if `command` may block on an fsync and should run off
    /// the async worker threads.
    pub fn needs_blocking(&self, command: &Command) -> bool {
        command.is_mutation() && self.db.blocks_on_fsync()
    }

    pub fn persistence_failures(&self) -> u64 {
        self.persistence_failures.load(Ordering::Relaxed)
    }

    /// Executes a command and returns the reply.
    pub fn execute(&self, command: Command) -> Reply {
        match command {
            Command::Ping => Reply::pong(),
            Command::Get { key } => match self.db.get(&key) {
                Some(value) => Reply::Value(value),
                None => Reply::Nil,
            },
            Command::Set { key, value } => match self.db.set(key, value) {
                Ok(()) => Reply::ok(),
                Err(e) => self.persistence_failure("SET", &e),
            },
            Command::Del { key } => match self.db.del(&key) {
                Ok(removed) => Reply::Integer(i64::from(removed)),
                Err(e) => self.persistence_failure("DEL", &e),
            },
        }
    }

    fn persistence_failure(&self, command: &'static str, error: &DbError) -> Reply {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
        match error {
            DbError::NotApplied(e) => {
                warn!(command, error = %e, "Mutation rejected: AOF write failed");
                Reply::error(PERSISTENCE_FAILURE)
            }
            DbError::NotDurable(e) => {
                warn!(command, error = %e, "Mutation applied but AOF fsync failed");
                Reply::error(NOT_DURABLE)
            }
        }
    }
}
