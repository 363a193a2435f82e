//! Tier Backends
//!
//! Each tier persists entries through a [`TierBackend`]: an in-process
//! sharded map for the fast tier, a [`DiskIndex`]-backed store for the local
//! tier, and a [`RemoteStore`] adapter for the distributed tier.

mod disk;
mod memory;
mod remote;

pub use disk::{DiskIndex, DiskStore, InMemoryDiskIndex};
pub use memory::MemoryStore;
pub use remote::{InMemoryRemoteStore, RemoteStore, RemoteTier};

use async_trait::async_trait;

use crate::entry::CacheEntry;
use crate::error::Result;

/// Metadata snapshot of one stored entry, used for eviction decisions and
/// sweeps without copying payloads
#[derive(Debug, Clone)]
pub struct EntrySummary {
    /// Entry key
    pub key: String,
    /// Payload size in bytes
    pub size: u64,
    /// Last access timestamp (epoch millis)
    pub last_access: u64,
    /// Recorded access count
    pub access_count: u64,
    /// Absolute expiry (epoch millis), if any
    pub expires_at: Option<u64>,
}

impl EntrySummary {
    /// Whether the summarized entry is logically absent at `now_ms`
    pub fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at, Some(deadline) if now_ms >= deadline)
    }
}

/// Backing store contract for a single tier.
///
/// `load` and `store` must be safe under concurrent callers for the same key
/// and for different keys without global serialization. A `load` that finds
/// an entry records the access atomically with the read.
#[async_trait]
pub trait TierBackend: Send + Sync {
    /// Load an entry, touching its access metadata on a hit
    async fn load(&self, key: &str, now_ms: u64) -> Result<Option<CacheEntry>>;

    /// Store an entry, atomically replacing any previous one.
    /// Returns the previous entry's size for capacity accounting.
    /// `now_ms` lets TTL-forwarding backends compute the remaining TTL.
    async fn store(&self, entry: CacheEntry, now_ms: u64) -> Result<Option<u64>>;

    /// Remove an entry; `true` if it was present
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Snapshot of all keys currently held. Backends that cannot enumerate
    /// (the remote collaborator) return an empty snapshot.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Metadata snapshot of all entries; a fresh call restarts the scan
    async fn scan(&self) -> Result<Vec<EntrySummary>>;

    /// Bytes currently held (0 for backends that do not track it)
    fn size_bytes(&self) -> u64;

    /// Number of entries currently held
    fn len(&self) -> usize;

    /// True if the backend holds no entries
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything
    async fn clear(&self) -> Result<()>;
}
