//! Persistent Local Tier Backend
//!
//! The actual bytes live behind a [`DiskIndex`] collaborator: a crash-safe
//! key→payload store whose durability policy (fsync, WAL) is its own
//! business. The backend keeps an in-memory summary index so eviction scans
//! never read payloads, the same split the warm tier of a mapped-file cache
//! uses between its index and its data files.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::entry::{CacheEntry, EntryRecord};
use crate::error::Result;

use super::{EntrySummary, TierBackend};

/// Crash-safe key→payload collaborator for the local disk tier
#[async_trait]
pub trait DiskIndex: Send + Sync {
    /// Read the payload stored under `key`
    async fn read(&self, key: &str) -> Result<Option<Bytes>>;

    /// Write `payload` under `key`, replacing any previous payload;
    /// returns the previous payload's length
    async fn write(&self, key: &str, payload: Bytes) -> Result<Option<u64>>;

    /// Remove the payload under `key`; `true` if it was present
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Enumerate all keys
    async fn keys(&self) -> Result<Vec<String>>;

    /// Drop everything
    async fn clear(&self) -> Result<()>;
}

/// In-memory [`DiskIndex`] for tests and ephemeral deployments
pub struct InMemoryDiskIndex {
    payloads: DashMap<String, Bytes>,
}

impl InMemoryDiskIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self {
            payloads: DashMap::new(),
        }
    }
}

impl Default for InMemoryDiskIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiskIndex for InMemoryDiskIndex {
    async fn read(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.payloads.get(key).map(|p| p.clone()))
    }

    async fn write(&self, key: &str, payload: Bytes) -> Result<Option<u64>> {
        Ok(self
            .payloads
            .insert(key.to_string(), payload)
            .map(|old| old.len() as u64))
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.payloads.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.payloads.iter().map(|e| e.key().clone()).collect())
    }

    async fn clear(&self) -> Result<()> {
        self.payloads.clear();
        Ok(())
    }
}

/// Per-key access bookkeeping held in the summary index
struct SummaryCell {
    size: u64,
    expires_at: Option<u64>,
    last_access: AtomicU64,
    access_count: AtomicU64,
}

/// Local-tier backend: payloads behind a [`DiskIndex`], metadata in memory
pub struct DiskStore {
    index: Arc<dyn DiskIndex>,
    summaries: DashMap<String, SummaryCell>,
    current_size: AtomicU64,
}

impl DiskStore {
    /// Create a store over the given disk index
    pub fn new(index: Arc<dyn DiskIndex>) -> Self {
        Self {
            index,
            summaries: DashMap::new(),
            current_size: AtomicU64::new(0),
        }
    }

    /// Create with an in-memory index (for testing)
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryDiskIndex::new()))
    }
}

#[async_trait]
impl TierBackend for DiskStore {
    async fn load(&self, key: &str, now_ms: u64) -> Result<Option<CacheEntry>> {
        let Some(payload) = self.index.read(key).await? else {
            return Ok(None);
        };

        let record: EntryRecord = serde_json::from_slice(&payload)?;
        let entry = record.into_entry();

        // The summary index is authoritative for access stats on this tier
        if let Some(cell) = self.summaries.get(key) {
            cell.last_access.store(now_ms, Ordering::Relaxed);
            let count = cell.access_count.fetch_add(1, Ordering::Relaxed) + 1;
            entry.metadata.set_access(now_ms, count);
        } else {
            entry.metadata.touch(now_ms);
        }

        Ok(Some(entry))
    }

    async fn store(&self, entry: CacheEntry, _now_ms: u64) -> Result<Option<u64>> {
        let key = entry.key.as_str().to_string();
        let size = entry.size();
        let record = EntryRecord::from(&entry);
        let payload = Bytes::from(serde_json::to_vec(&record)?);

        self.index.write(&key, payload).await?;

        let old = self.summaries.insert(
            key,
            SummaryCell {
                size,
                expires_at: entry.metadata.expires_at(),
                last_access: AtomicU64::new(entry.metadata.last_access()),
                access_count: AtomicU64::new(entry.metadata.access_count()),
            },
        );
        let prev_size = old.map(|cell| cell.size);

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
        let removed = self.index.remove(key).await?;
        if let Some((_, cell)) = self.summaries.remove(key) {
            self.current_size.fetch_sub(cell.size, Ordering::Relaxed);
        }
        Ok(removed)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.summaries.iter().map(|e| e.key().clone()).collect())
    }

    async fn scan(&self) -> Result<Vec<EntrySummary>> {
        Ok(self
            .summaries
            .iter()
            .map(|e| EntrySummary {
                key: e.key().clone(),
                size: e.size,
                last_access: e.last_access.load(Ordering::Relaxed),
                access_count: e.access_count.load(Ordering::Relaxed),
                expires_at: e.expires_at,
            })
            .collect())
    }

    fn size_bytes(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    fn len(&self) -> usize {
        self.summaries.len()
    }

    async fn clear(&self) -> Result<()> {
        self.index.clear().await?;
        self.summaries.clear();
        self.current_size.store(0, Ordering::Relaxed);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
