//! Sharded Concurrent Map
//!
//! Per-shard `RwLock`s keep same-key operations linear while operations on
//! different keys proceed without global serialization. Routing uses the
//! key's precomputed hash, so shard selection never rehashes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::entry::CacheKey;

/// Single shard: a hashmap behind its own lock plus an entry counter
struct Shard<V> {
    map: RwLock<HashMap<CacheKey, V>>,
    count: AtomicU64,
}

impl<V> Shard<V> {
    fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            count: AtomicU64::new(0),
        }
    }
}

/// Sharded map keyed by [`CacheKey`]; `N` must be a power of two
pub struct ShardedMap<V, const N: usize = 256> {
    shards: Box<[Shard<V>]>,
}

impl<V, const N: usize> Default for ShardedMap<V, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, const N: usize> ShardedMap<V, N> {
    /// Create a new sharded map
    pub fn new() -> Self {
        assert!(N.is_power_of_two(), "shard count must be a power of two");
        let shards: Vec<Shard<V>> = (0..N).map(|_| Shard::new()).collect();
        Self {
            shards: shards.into_boxed_slice(),
        }
    }

    #[inline]
    fn shard_for(&self, key: &CacheKey) -> &Shard<V> {
        &self.shards[key.shard_index(N)]
    }

    /// Total number of entries
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.count.load(Ordering::Relaxed) as usize)
            .sum()
    }

    /// True if no shard holds an entry
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` against the stored value under the shard's read lock.
    ///
    /// This is the read-with-side-effect path: `f` can touch atomic metadata
    /// and clone, and no concurrent writer can replace the entry mid-read.
    pub fn with_entry<R>(&self, key: &CacheKey, f: impl FnOnce(&V) -> R) -> Option<R> {
        let guard = self.shard_for(key).map.read();
        guard.get(key).map(f)
    }

    /// Insert, returning the replaced value if the key existed
    pub fn insert(&self, key: CacheKey, value: V) -> Option<V> {
        let shard = self.shard_for(&key);
        let old = shard.map.write().insert(key, value);
        if old.is_none() {
            shard.count.fetch_add(1, Ordering::Relaxed);
        }
        old
    }

    /// Remove, returning the value if the key existed
    pub fn remove(&self, key: &CacheKey) -> Option<V> {
        let shard = self.shard_for(key);
        let removed = shard.map.write().remove(key);
        if removed.is_some() {
            shard.count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Snapshot of all keys
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut out = Vec::with_capacity(self.len());
        for shard in self.shards.iter() {
            let guard = shard.map.read();
            out.extend(guard.keys().cloned());
        }
        out
    }

    /// Map every entry through `f` into a snapshot, one shard at a time
    pub fn snapshot<T>(&self, mut f: impl FnMut(&CacheKey, &V) -> T) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len());
        for shard in self.shards.iter() {
            let guard = shard.map.read();
            out.extend(guard.iter().map(|(k, v)| f(k, v)));
        }
        out
    }

    /// Clear every shard
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.map.write().clear();
            shard.count.store(0, Ordering::Relaxed);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
