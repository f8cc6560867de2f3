//! Sharded Key-Value Store
//!
//! This module implements the concurrent map at the heart of StashKV.
//! The key space is split into a power-of-two number of shards, each with its
//! own `RwLock`, so operations on keys in different shards never contend.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//!                 shard = fnv1a(key) & (N - 1)
//! ```
//!
//! There is no global lock. `for_each` walks the shards one at a time, so it
//! observes each shard at a different instant rather than one atomic view of
//! the whole store.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shard count used by [`Store::new`].
pub const DEFAULT_SHARDS: usize = 64;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a hash of `key`.
///
/// Deterministic across calls and processes, which keeps shard assignment
/// stable for the lifetime of a store.
#[inline]
pub fn fnv1a(key: &[u8]) -> u32 {
    key.iter().fold(FNV_OFFSET_BASIS, |hash, &byte| {
        (hash ^ byte as u32).wrapping_mul(FNV_PRIME)
    })
}

/// A single shard containing a portion of the key-value pairs.
#[derive(Debug, Default)]
struct Shard {
    data: RwLock<HashMap<Bytes, Bytes>>,
}

/// The concurrent sharded key-value map.
///
/// This struct is designed to be wrapped in an `Arc` and shared across
/// all client handler tasks and the background durability tasks.
///
/// # Example
///
/// ```
/// use stashkv::storage::Store;
/// use bytes::Bytes;
///
/// let store = Store::with_shards(10);
/// assert_eq!(store.shard_count(), 16);
///
/// store.set(Bytes::from("name"), Bytes::from("Ariz"));
/// assert_eq!(store.get(b"name"), Some(Bytes::from("Ariz")));
/// assert!(store.del(b"name"));
/// assert!(!store.del(b"name"));
/// ```
pub struct Store {
    shards: Box<[Shard]>,

    /// `shards.len() - 1`; shard count is always a power of two
    mask: u32,

    key_count: AtomicU64,
    get_count: AtomicU64,
    set_count: AtomicU64,
    del_count: AtomicU64,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("shards", &self.shards.len())
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Creates a store with [`DEFAULT_SHARDS`] shards.
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Creates a store with `n` shards, rounded up to the next power of two.
    ///
    /// A shard count of zero is treated as one.
    pub fn with_shards(n: usize) -> Self {
        let n = n.max(1).next_power_of_two();
        let shards = (0..n).map(|_| Shard::default()).collect();

        Self {
            shards,
            mask: (n - 1) as u32,
            key_count: AtomicU64::new(0),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
        }
    }

    /// Number of shards. Fixed for the lifetime of the store.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Determines which shard a key belongs to.
    #[inline]
    pub fn shard_index(&self, key: &[u8]) -> usize {
        (fnv1a(key) & self.mask) as usize
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Gets the value for a key.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.get_count.fetch_add(1, Ordering::Relaxed);
        self.shard(key).data.read().get(key).cloned()
    }

    /// Sets a key-value pair, overwriting any previous value.
    pub fn set(&self, key: Bytes, value: Bytes) {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let mut data = self.shard(&key).data.write();
        if data.insert(key, value).is_none() {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Sets a key-value pair after running `before` under the shard's write lock.
    ///
    /// The mutation is applied only if `before` succeeds. Because the hook and
    /// the mutation share one lock hold, anything `before` records for a key is
    /// ordered exactly like the mutations of that key.
    pub fn set_with<T, E, F>(&self, key: Bytes, value: Bytes, before: F) -> Result<T, E>
    where
        F: FnOnce(&Bytes, &Bytes) -> Result<T, E>,
    {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let mut data = self.shard(&key).data.write();
        let out = before(&key, &value)?;

        if data.insert(key, value).is_none() {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }

        Ok(out)
    }

    /// Deletes a key.
    ///
    /// Returns `true` if the key was removed, `false` if it was absent.
    pub fn del(&self, key: &[u8]) -> bool {
        self.del_count.fetch_add(1, Ordering::Relaxed);

        let mut data = self.shard(key).data.write();
        if data.remove(key).is_some() {
            self.key_count.fetch_sub(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Deletes a key after running `before` under the shard's write lock.
    ///
    /// `before` only runs when the key is present. Returns `Ok(None)` for an
    /// absent key and `Ok(Some(_))` once the key has been removed.
    pub fn del_with<T, E, F>(&self, key: &[u8], before: F) -> Result<Option<T>, E>
    where
        F: FnOnce(&Bytes) -> Result<T, E>,
    {
        self.del_count.fetch_add(1, Ordering::Relaxed);

        let mut data = self.shard(key).data.write();
        let Some((stored_key, _)) = data.get_key_value(key) else {
            return Ok(None);
        };
        let out = before(stored_key)?;

        data.remove(key);
        self.key_count.fetch_sub(1, Ordering::Relaxed);
        Ok(Some(out))
    }

    /// Visits every live entry, one shard at a time.
    ///
    /// Only the shard being visited is read-locked. Writers on other shards
    /// proceed concurrently, so the result may mix states from before and
    /// after concurrent writes.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&Bytes, &Bytes),
    {
        for shard in self.shards.iter() {
            let data = shard.data.read();
            for (key, value) in data.iter() {
                visit(key, value);
            }
        }
    }

    /// Like [`Store::for_each`], but stops at the first error `visit` returns.
    pub fn try_for_each<E, F>(&self, mut visit: F) -> Result<(), E>
    where
        F: FnMut(&Bytes, &Bytes) -> Result<(), E>,
    {
        for shard in self.shards.iter() {
            let data = shard.data.read();
            for (key, value) in data.iter() {
                visit(key, value)?;
            }
        }
        Ok(())
    }

    /// Removes every entry.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.data.write().clear();
        }
        self.key_count.store(0, Ordering::Relaxed);
    }

    /// Returns the number of keys in the store.
    ///
    /// This is an approximation under concurrent writes because it uses
    /// relaxed atomic ordering.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns store statistics.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            keys: self.key_count.load(Ordering::Relaxed),
            shards: self.shards.len(),
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
        }
    }
}

/// Store statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub keys: u64,
    pub shards: usize,
    pub get_ops: u64,
    pub set_ops: u64,
    pub del_ops: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_set_and_get() {
        let store = Store::new();

        store.set(Bytes::from("key"), Bytes::from("value"));
        assert_eq!(store.get(b"key"), Some(Bytes::from("value")));
    }

    #[test]
    fn test_get_nonexistent() {
        let store = Store::new();
        assert_eq!(store.get(b"nonexistent"), None);
    }

    #[test]
    fn test_set_overwrites() {
        let store = Store::new();

        store.set(Bytes::from("key"), Bytes::from("one"));
        store.set(Bytes::from("key"), Bytes::from("two"));

        assert_eq!(store.get(b"key"), Some(Bytes::from("two")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_delete() {
        let store = Store::new();

        store.set(Bytes::from("key"), Bytes::from("value"));
        assert!(store.del(b"key"));
        assert_eq!(store.get(b"key"), None);
        assert!(!store.del(b"key")); // Already deleted
        assert!(store.is_empty());
    }

    #[test]
    fn test_shard_count_rounds_up_to_power_of_two() {
        assert_eq!(Store::with_shards(0).shard_count(), 1);
        assert_eq!(Store::with_shards(1).shard_count(), 1);
        assert_eq!(Store::with_shards(3).shard_count(), 4);
        assert_eq!(Store::with_shards(64).shard_count(), 64);
        assert_eq!(Store::with_shards(65).shard_count(), 128);
    }

    #[test]
    fn test_fnv1a_known_vectors() {
        assert_eq!(fnv1a(b""), 0x811c_9dc5);
        assert_eq!(fnv1a(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn test_every_key_retrievable_for_any_shard_count() {
        for shards in [1, 2, 5, 16, 100] {
            let store = Store::with_shards(shards);
            let count = store.shard_count();

            for i in 0..500 {
                store.set(Bytes::from(format!("k{}", i)), Bytes::from(format!("v{}", i)));
            }

            for i in 0..500 {
                let key = format!("k{}", i);
                assert!(store.shard_index(key.as_bytes()) < count);
                assert_eq!(store.get(key.as_bytes()), Some(Bytes::from(format!("v{}", i))));
            }
            assert_eq!(store.len(), 500);
            assert_eq!(store.shard_count(), count);
        }
    }

    #[test]
    fn test_shard_index_is_stable() {
        let store = Store::with_shards(32);
        let first = store.shard_index(b"stable-key");
        for _ in 0..10 {
            assert_eq!(store.shard_index(b"stable-key"), first);
        }
    }

    #[test]
    fn test_last_write_wins() {
        let store = Store::new();

        store.set(Bytes::from("a"), Bytes::from("1"));
        store.set(Bytes::from("a"), Bytes::from("2"));
        store.del(b"a");
        assert_eq!(store.get(b"a"), None);

        store.set(Bytes::from("a"), Bytes::from("3"));
        assert_eq!(store.get(b"a"), Some(Bytes::from("3")));
    }

    #[test]
    fn test_set_with_failing_hook_leaves_store_untouched() {
        let store = Store::new();
        store.set(Bytes::from("key"), Bytes::from("old"));

        let result: Result<(), &str> =
            store.set_with(Bytes::from("key"), Bytes::from("new"), |_, _| Err("log down"));

        assert_eq!(result, Err("log down"));
        assert_eq!(store.get(b"key"), Some(Bytes::from("old")));
    }

    #[test]
    fn test_del_with_skips_hook_for_absent_key() {
        let store = Store::new();
        let mut calls = 0;

        let result: Result<Option<()>, ()> = store.del_with(b"missing", |_| {
            calls += 1;
            Ok(())
        });

        assert_eq!(result, Ok(None));
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_del_with_failing_hook_keeps_key() {
        let store = Store::new();
        store.set(Bytes::from("key"), Bytes::from("value"));

        let result: Result<Option<()>, &str> = store.del_with(b"key", |_| Err("log down"));

        assert_eq!(result, Err("log down"));
        assert!(store.get(b"key").is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_for_each_visits_all_entries() {
        let store = Store::with_shards(8);
        for i in 0..100 {
            store.set(Bytes::from(format!("k{}", i)), Bytes::from("v"));
        }

        let mut seen = 0;
        store.for_each(|_, v| {
            assert_eq!(v, &Bytes::from("v"));
            seen += 1;
        });
        assert_eq!(seen, 100);
    }

    #[test]
    fn test_try_for_each_stops_on_error() {
        let store = Store::new();
        for i in 0..10 {
            store.set(Bytes::from(format!("k{}", i)), Bytes::from("v"));
        }

        let mut seen = 0;
        let result = store.try_for_each(|_, _| {
            seen += 1;
            if seen == 3 {
                Err("stop")
            } else {
                Ok(())
            }
        });

        assert_eq!(result, Err("stop"));
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_clear() {
        let store = Store::new();
        store.set(Bytes::from("a"), Bytes::from("1"));
        store.set(Bytes::from("b"), Bytes::from("2"));

        store.clear();

        assert!(store.is_empty());
        assert_eq!(store.get(b"a"), None);
    }

    #[test]
    fn test_stats() {
        let store = Store::with_shards(4);
        store.set(Bytes::from("a"), Bytes::from("1"));
        store.get(b"a");
        store.get(b"b");
        store.del(b"a");

        let stats = store.stats();
        assert_eq!(stats.keys, 0);
        assert_eq!(stats.shards, 4);
        assert_eq!(stats.set_ops, 1);
        assert_eq!(stats.get_ops, 2);
        assert_eq!(stats.del_ops, 1);
    }

    #[test]
    fn test_concurrent_writers_distinct_keys() {
        let store = Arc::new(Store::new());
        let mut handles = vec![];

        for i in 0..10 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = format!("key-{}-{}", i, j);
                    store.set(Bytes::from(key.clone()), Bytes::from("value"));
                    assert!(store.get(key.as_bytes()).is_some());
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 1000);
    }

    #[test]
    fn test_concurrent_writers_same_key() {
        let store = Arc::new(Store::with_shards(4));
        let mut handles = vec![];

        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                let value = Bytes::from(format!("writer-{}-{}", i, "x".repeat(256)));
                for _ in 0..200 {
                    store.set(Bytes::from("shared"), value.clone());
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let value = store.get(b"shared").unwrap();
        let written: Vec<Bytes> = (0..8)
            .map(|i| Bytes::from(format!("writer-{}-{}", i, "x".repeat(256))))
            .collect();
        assert!(written.contains(&value));
        assert_eq!(store.len(), 1);
    }
}
