//! Cache Tier
//!
//! Ranks a backend, enforces its capacity with a one-victim-at-a-time
//! eviction loop, and converts backend failures into `TierUnavailable` so a
//! broken tier degrades instead of failing the whole operation. Rank 1 is
//! the fastest/smallest tier; capacity and latency are non-decreasing with
//! rank and the ordering is never changed at runtime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::entry::CacheEntry;
use crate::error::{Error, Result};
use crate::policy::TierPolicy;
use crate::store::{EntrySummary, TierBackend};

/// One ranked layer of the cache
pub struct Tier {
    /// 1 = fastest/smallest .. N = slowest/largest
    rank: usize,
    name: String,
    capacity: u64,
    policy: TierPolicy,
    backend: Arc<dyn TierBackend>,
    evictions: AtomicU64,
}

/// Point-in-time view of a tier's occupancy
#[derive(Debug, Clone)]
pub struct TierStats {
    pub rank: usize,
    pub name: String,
    pub capacity: u64,
    pub size_bytes: u64,
    pub entries: usize,
    pub evictions: u64,
    pub utilization: f64,
}

impl Tier {
    /// Create a tier over a backend
    pub fn new(
        rank: usize,
        name: impl Into<String>,
        capacity: u64,
        policy: TierPolicy,
        backend: Arc<dyn TierBackend>,
    ) -> Self {
        Self {
            rank,
            name: name.into(),
            capacity,
            policy,
            backend,
            evictions: AtomicU64::new(0),
        }
    }

    /// Tier rank (1-based)
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Tier name (for logs and errors)
    pub fn name(&self) -> &str {
        &self.name
    }

    fn degrade(&self, err: Error) -> Error {
        match err {
            e @ Error::TierUnavailable { .. } | e @ Error::CapacityExceeded { .. } => e,
            other => Error::TierUnavailable {
                tier: self.name.clone(),
                reason: other.to_string(),
            },
        }
    }

    /// Load an entry. An expired entry is physically removed and reported
    /// as absent.
    pub async fn get(&self, key: &str, now_ms: u64) -> Result<Option<CacheEntry>> {
        let loaded = self
            .backend
            .load(key, now_ms)
            .await
            .map_err(|e| self.degrade(e))?;

        match loaded {
            Some(entry) if entry.is_expired(now_ms) => {
                debug!(tier = %self.name, %key, "dropping expired entry on read");
                let _ = self.backend.remove(key).await;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Store an entry, evicting one victim at a time until it fits.
    ///
    /// If the tier empties out and the entry still does not fit, the store
    /// is rejected with `CapacityExceeded`, never silently dropped.
    pub async fn store(&self, entry: CacheEntry, now_ms: u64) -> Result<()> {
        let size = entry.size();
        let key = entry.key.as_str().to_string();

        if !self.policy.admit(size, self.capacity) {
            return Err(Error::CapacityExceeded {
                tier: self.name.clone(),
                needed: size,
                capacity: self.capacity,
            });
        }

        loop {
            let current = self.backend.size_bytes();
            if current + size <= self.capacity {
                break;
            }

            let snapshot = self.backend.scan().await.map_err(|e| self.degrade(e))?;
            // Replacing the same key frees its old footprint
            let replaced: u64 = snapshot
                .iter()
                .find(|s| s.key == key)
                .map(|s| s.size)
                .unwrap_or(0);
            if current.saturating_sub(replaced) + size <= self.capacity {
                break;
            }

            match self.policy.select_victim(&snapshot, now_ms, Some(&key)) {
                Some(victim) => {
                    debug!(tier = %self.name, %victim, "evicting to make room");
                    self.backend
                        .remove(&victim)
                        .await
                        .map_err(|e| self.degrade(e))?;
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    return Err(Error::CapacityExceeded {
                        tier: self.name.clone(),
                        needed: size,
                        capacity: self.capacity,
                    });
                }
            }
        }

        self.backend
            .store(entry, now_ms)
            .await
            .map_err(|e| self.degrade(e))?;
        Ok(())
    }

    /// Remove an entry; `true` if it was present
    pub async fn remove(&self, key: &str) -> Result<bool> {
        self.backend.remove(key).await.map_err(|e| self.degrade(e))
    }

    /// Snapshot of this tier's keys (empty for non-enumerable backends)
    pub async fn keys(&self) -> Result<Vec<String>> {
        self.backend.keys().await.map_err(|e| self.degrade(e))
    }

    /// Metadata snapshot of this tier's entries
    pub async fn scan(&self) -> Result<Vec<EntrySummary>> {
        self.backend.scan().await.map_err(|e| self.degrade(e))
    }

    /// Physically remove every expired entry; returns how many were purged
    pub async fn purge_expired(&self, now_ms: u64) -> Result<usize> {
        let snapshot = self.backend.scan().await.map_err(|e| self.degrade(e))?;
        let mut purged = 0;
        for summary in snapshot {
            if summary.is_expired(now_ms)
                && self
                    .backend
                    .remove(&summary.key)
                    .await
                    .map_err(|e| self.degrade(e))?
            {
                purged += 1;
            }
        }
        Ok(purged)
    }

    /// Drop everything in this tier
    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await.map_err(|e| self.degrade(e))
    }

    /// Occupancy snapshot
    pub fn stats(&self) -> TierStats {
        let size = self.backend.size_bytes();
        TierStats {
            rank: self.rank,
            name: self.name.clone(),
            capacity: self.capacity,
            size_bytes: size,
            entries: self.backend.len(),
            evictions: self.evictions.load(Ordering::Relaxed),
            utilization: if self.capacity == 0 {
                0.0
            } else {
                size as f64 / self.capacity as f64
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use std::time::Duration;

    fn tier(capacity: u64) -> Tier {
        Tier::new(
            1,
            "fast",
            capacity,
            TierPolicy::lru(),
            Arc::new(MemoryStore::new()),
        )
    }

    fn entry(key: &str, size: usize, now: u64) -> CacheEntry {
        CacheEntry::new(key, Bytes::from(vec![0u8; size]), now)
    }

    #[tokio::test]
    async fn test_store_and_get() {
        let tier = tier(1024);
        tier.store(entry("k", 100, 0), 0).await.unwrap();

        let got = tier.get("k", 50).await.unwrap();
        assert!(got.is_some());
        assert!(tier.get("missing", 50).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent_and_purged() {
        let tier = tier(1024);
        let e = entry("k", 10, 0).with_ttl(Duration::from_secs(1), 0);
        tier.store(e, 0).await.unwrap();

        assert!(tier.get("k", 500).await.unwrap().is_some());
        // Logically absent past expiry, physically removed on read
        assert!(tier.get("k", 1_500).await.unwrap().is_none());
        assert_eq!(tier.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_eviction_one_victim_at_a_time() {
        let tier = tier(300);

        tier.store(entry("a", 100, 0), 0).await.unwrap();
        tier.store(entry("b", 100, 10), 10).await.unwrap();
        tier.store(entry("c", 100, 20), 20).await.unwrap();

        // Refresh "a" so "b" becomes the LRU victim
        tier.get("a", 30).await.unwrap();

        tier.store(entry("d", 100, 40), 40).await.unwrap();

        assert!(tier.get("a", 50).await.unwrap().is_some());
        assert!(tier.get("b", 50).await.unwrap().is_none());
        assert!(tier.get("c", 50).await.unwrap().is_some());
        assert!(tier.get("d", 50).await.unwrap().is_some());
        assert_eq!(tier.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_oversized_entry_rejected() {
        let tier = tier(100);
        tier.store(entry("small", 50, 0), 0).await.unwrap();

        let err = tier.store(entry("huge", 200, 0), 0).await.unwrap_err();
        assert_matches!(err, Error::CapacityExceeded { needed: 200, .. });
        // The resident entry was not disturbed
        assert!(tier.get("small", 0).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_replacement_does_not_over_evict() {
        let tier = tier(200);
        tier.store(entry("a", 150, 0), 0).await.unwrap();
        tier.store(entry("b", 40, 0), 0).await.unwrap();

        // Replacing "a" with an equal-size payload fits without eviction
        tier.store(entry("a", 150, 10), 10).await.unwrap();
        assert!(tier.get("b", 20).await.unwrap().is_some());
        assert_eq!(tier.stats().evictions, 0);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let tier = tier(1024);
        tier.store(entry("keep", 10, 0), 0).await.unwrap();
        tier.store(
            entry("drop1", 10, 0).with_ttl(Duration::from_secs(1), 0),
            0,
        )
        .await
        .unwrap();
        tier.store(
            entry("drop2", 10, 0).with_ttl(Duration::from_secs(2), 0),
            0,
        )
        .await
        .unwrap();

        let purged = tier.purge_expired(5_000).await.unwrap();
        assert_eq!(purged, 2);
        assert_eq!(tier.stats().entries, 1);
    }

    #[tokio::test]
    async fn test_stats() {
        let tier = tier(1_000);
        tier.store(entry("k", 250, 0), 0).await.unwrap();

        let stats = tier.stats();
        assert_eq!(stats.rank, 1);
        assert_eq!(stats.name, "fast");
        assert_eq!(stats.size_bytes, 250);
        assert_eq!(stats.entries, 1);
        assert!((stats.utilization - 0.25).abs() < f64::EPSILON);
    }
}
