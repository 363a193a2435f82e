//! Cache Entry Types
//!
//! Keys carry a precomputed hash for cheap shard routing and comparison.
//! Entry metadata uses atomics so a read can update recency bookkeeping
//! without taking a write lock.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Cache key with a precomputed non-cryptographic hash
#[derive(Clone, Debug, Eq)]
pub struct CacheKey {
    /// FxHash of the key string
    hash: u64,
    /// Full key
    key: String,
}

impl CacheKey {
    /// Create a new cache key
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        let hash = fx_hash(key.as_bytes());
        Self { hash, key }
    }

    /// Shard index for this key; `shard_count` must be a power of two
    #[inline]
    pub fn shard_index(&self, shard_count: usize) -> usize {
        (self.hash as usize) & (shard_count - 1)
    }

    /// The key string
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.key
    }
}

#[inline]
fn fx_hash(bytes: &[u8]) -> u64 {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    for &byte in bytes {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(SEED);
    }
    hash
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        // Fast path on the precomputed hash, full comparison for collisions
        self.hash == other.hash && self.key == other.key
    }
}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Metadata for a cache entry
///
/// `last_access` and `access_count` are atomics: every successful load
/// touches them without observing a partially-updated entry.
#[derive(Debug)]
pub struct EntryMetadata {
    /// Payload size in bytes
    size: u64,
    /// Creation timestamp (epoch millis)
    created_at: u64,
    /// Last access timestamp (epoch millis)
    last_access: AtomicU64,
    /// Access count for frequency-based eviction tie-breaks
    access_count: AtomicU64,
    /// Absolute expiry (epoch millis); None = no expiry
    expires_at: Option<u64>,
}

impl EntryMetadata {
    /// Create metadata for a freshly loaded/stored entry
    pub fn new(size: u64, now_ms: u64) -> Self {
        Self {
            size,
            created_at: now_ms,
            last_access: AtomicU64::new(now_ms),
            access_count: AtomicU64::new(1),
            expires_at: None,
        }
    }

    /// Payload size in bytes
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Creation timestamp (epoch millis)
    #[inline]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Last access timestamp (epoch millis)
    #[inline]
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Number of recorded accesses
    #[inline]
    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Absolute expiry (epoch millis), if any
    #[inline]
    pub fn expires_at(&self) -> Option<u64> {
        self.expires_at
    }

    /// Record an access and return the new count
    #[inline]
    pub fn touch(&self, now_ms: u64) -> u64 {
        self.last_access.store(now_ms, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Overwrite access bookkeeping from an external authoritative source
    /// (the disk tier keeps access stats in its in-memory index)
    pub(crate) fn set_access(&self, last_ms: u64, count: u64) {
        self.last_access.store(last_ms, Ordering::Relaxed);
        self.access_count.store(count, Ordering::Relaxed);
    }

    /// An entry past its expiry is logically absent regardless of physical
    /// presence
    #[inline]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        match self.expires_at {
            Some(deadline) => now_ms >= deadline,
            None => false,
        }
    }

    /// TTL left at `now_ms`, if the entry expires
    pub fn remaining_ttl(&self, now_ms: u64) -> Option<Duration> {
        self.expires_at
            .map(|deadline| Duration::from_millis(deadline.saturating_sub(now_ms)))
    }

    /// Time since the last access
    #[inline]
    pub fn idle_for(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.last_access()))
    }
}

impl Clone for EntryMetadata {
    fn clone(&self) -> Self {
        Self {
            size: self.size,
            created_at: self.created_at,
            last_access: AtomicU64::new(self.last_access()),
            access_count: AtomicU64::new(self.access_count()),
            expires_at: self.expires_at,
        }
    }
}

/// Cache entry: opaque payload, metadata, and the labels the invalidation
/// index is built from. Each tier owns its own physical copy.
#[derive(Clone)]
pub struct CacheEntry {
    /// Entry key
    pub key: CacheKey,
    /// Entry metadata
    pub metadata: EntryMetadata,
    /// Opaque payload (never inspected by the core)
    value: Bytes,
    /// Labels for bulk invalidation
    tags: HashSet<String>,
    /// Keys this entry depends on (cascade invalidation)
    dependencies: HashSet<String>,
}

impl CacheEntry {
    /// Create a new entry with no expiry, tags or dependencies
    pub fn new(key: impl Into<String>, value: Bytes, now_ms: u64) -> Self {
        let size = value.len() as u64;
        Self {
            key: CacheKey::new(key),
            metadata: EntryMetadata::new(size, now_ms),
            value,
            tags: HashSet::new(),
            dependencies: HashSet::new(),
        }
    }

    /// Set an absolute expiry `ttl` from now
    pub fn with_ttl(mut self, ttl: Duration, now_ms: u64) -> Self {
        self.metadata.expires_at = Some(now_ms + ttl.as_millis() as u64);
        self
    }

    /// Attach invalidation tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Declare dependencies on other keys
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// The payload (zero-copy)
    #[inline]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Payload size in bytes
    #[inline]
    pub fn size(&self) -> u64 {
        self.metadata.size()
    }

    /// Invalidation tags
    #[inline]
    pub fn tags(&self) -> &HashSet<String> {
        &self.tags
    }

    /// Declared dependencies
    #[inline]
    pub fn dependencies(&self) -> &HashSet<String> {
        &self.dependencies
    }

    /// Whether this entry is logically absent at `now_ms`
    #[inline]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.metadata.is_expired(now_ms)
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key.as_str())
            .field("size", &self.metadata.size())
            .field("access_count", &self.metadata.access_count())
            .field("expires_at", &self.metadata.expires_at())
            .field("tags", &self.tags.len())
            .field("dependencies", &self.dependencies.len())
            .finish()
    }
}

/// Serialized form of an entry for disk and remote tiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryRecord {
    pub key: String,
    pub value: Bytes,
    pub created_at: u64,
    pub last_access: u64,
    pub access_count: u64,
    pub expires_at: Option<u64>,
    pub tags: HashSet<String>,
    pub dependencies: HashSet<String>,
}

impl From<&CacheEntry> for EntryRecord {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.as_str().to_string(),
            value: entry.value.clone(),
            created_at: entry.metadata.created_at(),
            last_access: entry.metadata.last_access(),
            access_count: entry.metadata.access_count(),
            expires_at: entry.metadata.expires_at(),
            tags: entry.tags.clone(),
            dependencies: entry.dependencies.clone(),
        }
    }
}

impl EntryRecord {
    /// Rehydrate into an owned entry, preserving metadata
    pub fn into_entry(self) -> CacheEntry {
        let size = self.value.len() as u64;
        CacheEntry {
            key: CacheKey::new(self.key),
            metadata: EntryMetadata {
                size,
                created_at: self.created_at,
                last_access: AtomicU64::new(self.last_access),
                access_count: AtomicU64::new(self.access_count),
                expires_at: self.expires_at,
            },
            value: self.value,
            tags: self.tags,
            dependencies: self.dependencies,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
