//! In-Process Tier Backend
//!
//! Sharded in-memory store for the fast tier. Access metadata is touched
//! under the shard's read lock, so readers never observe a partially-updated
//! entry and a concurrent overwrite cannot interleave with the touch.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::entry::{CacheEntry, CacheKey};
use crate::error::Result;
use crate::shard::ShardedMap;
use crate::SHARD_COUNT;

use super::{EntrySummary, TierBackend};

/// Fast-tier backend over a sharded map
pub struct MemoryStore {
    storage: ShardedMap<CacheEntry, SHARD_COUNT>,
    current_size: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            storage: ShardedMap::new(),
            current_size: AtomicU64::new(0),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TierBackend for MemoryStore {
    async fn load(&self, key: &str, now_ms: u64) -> Result<Option<CacheEntry>> {
        let key = CacheKey::new(key);
        Ok(self.storage.with_entry(&key, |entry| {
            entry.metadata.touch(now_ms);
            entry.clone()
        }))
    }

    async fn store(&self, entry: CacheEntry, _now_ms: u64) -> Result<Option<u64>> {
        let size = entry.size();
        let key = entry.key.clone();
        let old = self.storage.insert(key, entry);
        let prev_size = old.map(|e| e.size());

        match prev_size {
            Some(prev) if prev > size => {
                self.current_size.fetch_sub(prev - size, Ordering::Relaxed);
            }
            Some(prev) => {
                self.current_size.fetch_add(size - prev, Ordering::Relaxed);
            }
            None => {
                self.current_size.fetch_add(size, Ordering::Relaxed);
            }
        }
        Ok(prev_size)
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        match self.storage.remove(&CacheKey::new(key)) {
            Some(entry) => {
                self.current_size.fetch_sub(entry.size(), Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .storage
            .keys()
            .into_iter()
            .map(|k| k.as_str().to_string())
            .collect())
    }

    async fn scan(&self) -> Result<Vec<EntrySummary>> {
        Ok(self.storage.snapshot(|key, entry| EntrySummary {
            key: key.as_str().to_string(),
            size: entry.size(),
            last_access: entry.metadata.last_access(),
            access_count: entry.metadata.access_count(),
            expires_at: entry.metadata.expires_at(),
        }))
    }

    fn size_bytes(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    fn len(&self) -> usize {
        self.storage.len()
    }

    async fn clear(&self) -> Result<()> {
        self.storage.clear();
        self.current_size.store(0, Ordering::Relaxed);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
