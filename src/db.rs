//! Durable Database Handle
//!
//! [`Db`] pairs the in-memory [`Store`] with an optional [`AofWriter`].
//! Every mutation is written to the log while the owning shard is still
//! locked, and only applied to the store if that write succeeded:
//!
//! ```text
//!   set(k, v)
//!     ├─ lock shard(k)
//!     │    ├─ aof.write("SET k v")   ── fails? ──> Err, store untouched
//!     │    └─ shard.insert(k, v)
//!     ├─ unlock
//!     └─ aof.commit(offset)          (fsync under `always`)
//!                                    ── fails? ──> Err, store already changed
//! ```
//!
//! Two writers of the same key therefore log their records in the same order
//! they change the store, which keeps replay faithful.
//!
//! A failed fsync cannot be rolled back: the record is already in the OS and
//! other clients may have read the new value. [`DbError`] tells the two
//! failures apart.

use crate::persistence::{AofError, AofWriter, FsyncPolicy, Record};
use crate::storage::Store;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

/// Why a mutation failed.
#[derive(Debug, Error)]
pub enum DbError {
    /// The log write failed; the store is unchanged
    #[error("AOF write failed: {0}")]
    NotApplied(#[source] AofError),

    /// The mutation is applied and logged, but its fsync failed
    #[error("mutation applied but not durable: {0}")]
    NotDurable(#[source] AofError),
}

impl DbError {
    /// Returns true if the store was changed despite the error.
    pub fn is_applied(&self) -> bool {
        matches!(self, DbError::NotDurable(_))
    }
}

/// A cheaply clonable handle to the store and its log.
#[derive(Debug, Clone)]
pub struct Db {
    store: Arc<Store>,
    aof: Option<Arc<AofWriter>>,
}

impl Db {
    /// A database with no log; nothing survives a restart.
    pub fn in_memory(store: Arc<Store>) -> Self {
        Self { store, aof: None }
    }

    /// A database that logs every mutation to `aof`.
    pub fn with_aof(store: Arc<Store>, aof: Arc<AofWriter>) -> Self {
        Self {
            store,
            aof: Some(aof),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn aof(&self) -> Option<&Arc<AofWriter>> {
        self.aof.as_ref()
    }

    /// Returns true if mutations fsync before returning.
    ///
    /// Callers on an async runtime should move such mutations to a blocking
    /// thread.
    pub fn blocks_on_fsync(&self) -> bool {
        self.aof
            .as_ref()
            .is_some_and(|aof| aof.policy() == FsyncPolicy::Always)
    }

    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.store.get(key)
    }

    /// Stores `value` under `key`.
    ///
    /// On [`DbError::NotApplied`] the store is unchanged.
    pub fn set(&self, key: Bytes, value: Bytes) -> Result<(), DbError> {
        let Some(aof) = &self.aof else {
            self.store.set(key, value);
            return Ok(());
        };

        let offset = self
            .store
            .set_with(key, value, |key, value| {
                aof.write(&Record::set(key.clone(), value.clone()))
            })
            .map_err(DbError::NotApplied)?;
        aof.commit(offset).map_err(DbError::NotDurable)
    }

    /// Removes `key`, returning whether it existed.
    ///
    /// Deleting an absent key writes nothing to the log.
    pub fn del(&self, key: &[u8]) -> Result<bool, DbError> {
        let Some(aof) = &self.aof else {
            return Ok(self.store.del(key));
        };

        match self
            .store
            .del_with(key, |key| aof.write(&Record::del(key.clone())))
            .map_err(DbError::NotApplied)?
        {
            Some(offset) => {
                aof.commit(offset).map_err(DbError::NotDurable)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
