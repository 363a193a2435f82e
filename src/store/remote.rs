//! Distributed Remote Tier Backend
//!
//! The remote key-value transport is a collaborator behind [`RemoteStore`];
//! any backend that can get/set-with-TTL/delete bytes satisfies it. The tier
//! tolerates transient unavailability: errors from the transport surface as
//! `TierUnavailable` and only degrade this tier's participation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::entry::{CacheEntry, EntryRecord};
use crate::error::{Error, Result};

use super::{EntrySummary, TierBackend};

/// Remote key-value transport contract
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the bytes stored under `key`
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store bytes under `key`; `ttl` is forwarded to the backend's own
    /// expiry mechanism when present
    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()>;

    /// Delete the bytes under `key`; `true` if something was deleted
    async fn delete(&self, key: &str) -> Result<bool>;
}

/// In-memory [`RemoteStore`] for testing, with an unavailability switch to
/// exercise degraded-tier paths
pub struct InMemoryRemoteStore {
    values: DashMap<String, (Bytes, Option<Duration>)>,
    outage: Mutex<Option<String>>,
}

impl InMemoryRemoteStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            values: DashMap::new(),
            outage: Mutex::new(None),
        }
    }

    /// Simulate an outage; every call fails with `TierUnavailable` until
    /// [`Self::restore`] is called
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.outage.lock() = Some(reason.into());
    }

    /// End a simulated outage
    pub fn restore(&self) {
        *self.outage.lock() = None;
    }

    /// TTL the last write for `key` carried (for assertions)
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.values.get(key).and_then(|v| v.1)
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn check_outage(&self) -> Result<()> {
        match self.outage.lock().as_ref() {
            Some(reason) => Err(Error::TierUnavailable {
                tier: "remote".to_string(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.check_outage()?;
        Ok(self.values.get(key).map(|v| v.0.clone()))
    }

    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.check_outage()?;
        self.values.insert(key.to_string(), (value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check_outage()?;
        Ok(self.values.remove(key).is_some())
    }
}

/// Tier backend adapting a [`RemoteStore`] transport.
///
/// The transport cannot enumerate keys, so `keys()`/`scan()` return empty
/// snapshots; the remote tier is TTL-bounded, never capacity-evicted.
pub struct RemoteTier {
    store: Arc<dyn RemoteStore>,
}

impl RemoteTier {
    /// Wrap a remote transport
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TierBackend for RemoteTier {
    async fn load(&self, key: &str, now_ms: u64) -> Result<Option<CacheEntry>> {
        let Some(payload) = self.store.get(key).await? else {
            return Ok(None);
        };

        let record: EntryRecord = serde_json::from_slice(&payload)?;
        let entry = record.into_entry();
        // Access bookkeeping on the in-process copy only; the transport is
        // not written back on reads
        entry.metadata.touch(now_ms);
        Ok(Some(entry))
    }

    async fn store(&self, entry: CacheEntry, now_ms: u64) -> Result<Option<u64>> {
        let record = EntryRecord::from(&entry);
        let payload = Bytes::from(serde_json::to_vec(&record)?);
        let ttl = entry.metadata.remaining_ttl(now_ms);

        self.store
            .set_with_ttl(entry.key.as_str(), payload, ttl)
            .await?;
        // Previous size is unknown to the transport
        Ok(None)
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        self.store.delete(key).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn scan(&self) -> Result<Vec<EntrySummary>> {
        Ok(Vec::new())
    }

    fn size_bytes(&self) -> u64 {
        0
    }

    fn len(&self) -> usize {
        0
    }

    async fn clear(&self) -> Result<()> {
        // Clearing is backend-specific (FLUSHDB and friends); not part of
        // the narrow transport contract
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
