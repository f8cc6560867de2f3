//! Storage Module
//!
//! The in-memory half of the database: a sharded hash map that every
//! connection shares through an `Arc`.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...N     │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//!            shard = fnv1a(key) & (N - 1)
//! ```
//!
//! ## Example
//!
//! ```
//! use stashkv::storage::Store;
//! use bytes::Bytes;
//!
//! let store = Store::with_shards(16);
//! store.set(Bytes::from("name"), Bytes::from("stash"));
//! assert_eq!(store.get(b"name"), Some(Bytes::from("stash")));
//! assert!(store.del(b"name"));
//! ```

pub mod store;

pub use store::{fnv1a, Store, StoreStats, DEFAULT_SHARDS};
