//! Multi-Tier Cache Facade
//!
//! `MultiTierCache` composes the tiers, the invalidation index, the
//! promotion controller and the stampede guard behind one API. Reads walk
//! the tiers fastest-first; writes go through to every tier; misses can be
//! coalesced through a caller-supplied loader. A background sweep purges
//! expired entries and demotes idle fast-tier entries on a fixed interval.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{CacheConfig, TierConfig};
use crate::entry::CacheEntry;
use crate::error::{Error, Result};
use crate::invalidation::{glob_match, InvalidationIndex};
use crate::metrics::{CacheMetrics, MetricsSnapshot};
use crate::policy::TierPolicy;
use crate::promotion::PromotionController;
use crate::serializer::{JsonSerializer, Serializer};
use crate::stampede::{Flight, FlightOutcome, StampedeGuard, WaitResult};
use crate::store::MemoryStore;
use crate::tier::{Tier, TierStats};

/// Error type accepted from caller-supplied loaders
pub type LoaderError = Box<dyn std::error::Error + Send + Sync>;

/// Per-write options: expiry and invalidation labels
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
    pub dependencies: Vec<String>,
}

impl SetOptions {
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn depends_on(mut self, key: impl Into<String>) -> Self {
        self.dependencies.push(key.into());
        self
    }
}

/// Which tiers accepted a write. A set succeeds as long as the entry landed
/// somewhere; per-tier failures are partial-success signals, not errors.
#[derive(Debug, Clone, Default)]
pub struct SetOutcome {
    /// Tiers that stored the entry
    pub written: Vec<String>,
    /// Tiers skipped because their backing store was unreachable
    pub degraded: Vec<String>,
    /// Tiers that rejected the entry even after eviction attempts
    pub rejected: Vec<String>,
}

impl SetOutcome {
    pub fn fully_written(&self) -> bool {
        self.degraded.is_empty() && self.rejected.is_empty()
    }

    pub fn written_anywhere(&self) -> bool {
        !self.written.is_empty()
    }
}

struct SweepTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// The cache facade
pub struct MultiTierCache {
    tiers: Vec<Arc<Tier>>,
    index: InvalidationIndex,
    guard: StampedeGuard,
    promoter: Arc<PromotionController>,
    clock: Arc<dyn Clock>,
    metrics: Arc<CacheMetrics>,
    serializer: JsonSerializer,
    sweep: Mutex<Option<SweepTask>>,
}

impl MultiTierCache {
    /// Build a cache over pre-constructed tiers, ordered fastest first.
    /// Spawns the background sweep unless the config disables it, so this
    /// must run inside a tokio runtime.
    pub fn new(config: CacheConfig, tiers: Vec<Tier>, clock: Arc<dyn Clock>) -> Self {
        let tiers: Vec<Arc<Tier>> = tiers.into_iter().map(Arc::new).collect();
        let metrics = Arc::new(CacheMetrics::new(tiers.len()));
        let promoter = Arc::new(PromotionController::new(config.promotion.clone()));

        let sweep = if config.enable_sweep {
            Some(Self::spawn_sweep(
                config.sweep_interval,
                tiers.clone(),
                promoter.clone(),
                metrics.clone(),
                clock.clone(),
            ))
        } else {
            None
        };

        Self {
            tiers,
            index: InvalidationIndex::new(),
            guard: StampedeGuard::new(config.stampede_wait),
            promoter,
            clock,
            metrics,
            serializer: JsonSerializer,
            sweep: Mutex::new(sweep),
        }
    }

    /// All-memory cache from tier descriptions, LRU policy per tier.
    pub fn in_memory(config: CacheConfig, tiers: &[TierConfig], clock: Arc<dyn Clock>) -> Self {
        let tiers = tiers
            .iter()
            .enumerate()
            .map(|(i, tc)| {
                Tier::new(
                    i + 1,
                    tc.name.clone(),
                    tc.capacity,
                    TierPolicy::lru(),
                    Arc::new(MemoryStore::new()),
                )
            })
            .collect();
        Self::new(config, tiers, clock)
    }

    /// Look up a key, walking tiers fastest-first. Returns the payload from
    /// the fastest tier holding a live copy; `None` after a full-descent
    /// miss. Tier outages are absorbed and counted, never surfaced.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let now = self.clock.now_millis();
        for (i, tier) in self.tiers.iter().enumerate() {
            match tier.get(key, now).await {
                Ok(Some(entry)) => {
                    self.metrics.record_hit(i);
                    if i > 0 {
                        self.maybe_promote(key, &entry, i, now).await;
                    }
                    return Ok(Some(entry.value().clone()));
                }
                Ok(None) => self.metrics.record_miss(i),
                Err(err) if err.is_degradation() => {
                    self.metrics.record_unavailable(i);
                    warn!(key, tier = tier.name(), %err, "tier skipped during get");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    /// Look up a key; on a full-descent miss, run `loader` under the
    /// single-flight gate and write the result through every tier.
    /// Concurrent callers for the same key wait for the one in-flight load
    /// instead of issuing their own; a woken waiter re-checks the tiers
    /// before trusting the broadcast payload.
    pub async fn get_or_load<F, Fut>(
        &self,
        key: &str,
        options: SetOptions,
        loader: F,
    ) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Bytes, LoaderError>>,
    {
        let mut loader = Some(loader);
        loop {
            if let Some(value) = self.get(key).await? {
                return Ok(value);
            }

            match self.guard.join(key) {
                Flight::Leader(lease) => {
                    self.metrics.record_stampede_lead();
                    // The gate is per-caller, so the loader is still unconsumed
                    // whenever leadership is won. If this future is dropped
                    // before `complete`, the lease releases the key on its way
                    // out and followers retry with a fresh leader.
                    let load = loader.take().ok_or_else(|| Error::LoaderFailed {
                        key: key.to_string(),
                        reason: "loader already consumed".to_string(),
                    })?;
                    return match load().await {
                        Ok(value) => {
                            let outcome = self.set(key, value.clone(), options).await?;
                            if !outcome.written_anywhere() {
                                debug!(key, "loaded value cached nowhere, all tiers degraded");
                            }
                            lease.complete(FlightOutcome::Loaded(value.clone()));
                            Ok(value)
                        }
                        Err(err) => {
                            self.metrics.record_loader_failure();
                            let reason = err.to_string();
                            lease.complete(FlightOutcome::Failed(reason.clone()));
                            Err(Error::LoaderFailed {
                                key: key.to_string(),
                                reason,
                            })
                        }
                    };
                }
                Flight::Follower(rx) => {
                    self.metrics.record_stampede_wait();
                    match self.guard.wait(key, rx).await? {
                        WaitResult::Outcome(FlightOutcome::Loaded(value)) => {
                            // The leader populated the tiers; the re-check is
                            // authoritative and the payload a fallback for the
                            // case where every tier write degraded.
                            if let Some(fresh) = self.get(key).await? {
                                return Ok(fresh);
                            }
                            return Ok(value);
                        }
                        WaitResult::Outcome(FlightOutcome::Failed(reason)) => {
                            return Err(Error::LoaderFailed {
                                key: key.to_string(),
                                reason,
                            });
                        }
                        WaitResult::Retry => continue,
                    }
                }
            }
        }
    }

    /// Write a value through every tier. Unreachable tiers and capacity
    /// rejections are reported in the outcome, not raised. The entry's tags
    /// and dependencies are indexed only once some tier holds it, so a
    /// write no tier accepted leaves the reverse index untouched.
    pub async fn set(&self, key: &str, value: Bytes, options: SetOptions) -> Result<SetOutcome> {
        let now = self.clock.now_millis();
        let mut entry = CacheEntry::new(key, value, now)
            .with_tags(options.tags)
            .with_dependencies(options.dependencies);
        if let Some(ttl) = options.ttl {
            entry = entry.with_ttl(ttl, now);
        }

        let mut outcome = SetOutcome::default();
        for (i, tier) in self.tiers.iter().enumerate() {
            match tier.store(entry.clone(), now).await {
                Ok(()) => {
                    self.metrics.record_write(i);
                    outcome.written.push(tier.name().to_string());
                }
                Err(err @ Error::CapacityExceeded { .. }) => {
                    debug!(key, tier = tier.name(), %err, "tier rejected entry");
                    outcome.rejected.push(tier.name().to_string());
                }
                Err(err) if err.is_degradation() => {
                    self.metrics.record_unavailable(i);
                    warn!(key, tier = tier.name(), %err, "tier skipped during set");
                    outcome.degraded.push(tier.name().to_string());
                }
                Err(err) => return Err(err),
            }
        }

        if outcome.written_anywhere() {
            // Replaces any stale indexing from a prior version of the key
            self.index.index_entry(&entry);
        }
        Ok(outcome)
    }

    /// Remove a key from every tier and drop its indexing. Returns whether
    /// any tier held it. Removing an absent key is a no-op success.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let removed = self.remove_everywhere(key).await;
        if removed {
            self.metrics.record_invalidated(1);
        }
        Ok(removed)
    }

    /// Invalidate every key carrying `tag`. Returns the number of keys
    /// removed from at least one tier.
    pub async fn invalidate_tag(&self, tag: &str) -> Result<u64> {
        let keys = self.index.keys_for_tag(tag);
        let mut removed = 0;
        for key in keys {
            if self.remove_everywhere(&key).await {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(tag, removed, "tag invalidated");
            self.metrics.record_invalidated(removed);
        }
        Ok(removed)
    }

    /// Invalidate a key and, transitively, everything that depends on it.
    /// A visited set makes dependency cycles terminate.
    pub async fn invalidate_dependency(&self, key: &str) -> Result<u64> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut stack = vec![key.to_string()];
        let mut removed = 0;

        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            // Capture dependents before the delete unwinds the index
            for dependent in self.index.dependents_of(&current) {
                if !visited.contains(&dependent) {
                    stack.push(dependent);
                }
            }
            if self.remove_everywhere(&current).await {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(key, removed, "dependency cascade invalidated");
            self.metrics.record_invalidated(removed);
        }
        Ok(removed)
    }

    /// Invalidate every key matching a glob pattern (`*` and `?`). Keys are
    /// enumerated from every tier that supports enumeration; matches are
    /// removed from all tiers. Bulk operation, not a hot path.
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<u64> {
        let mut known: HashSet<String> = HashSet::new();
        for (i, tier) in self.tiers.iter().enumerate() {
            match tier.keys().await {
                Ok(keys) => known.extend(keys),
                Err(err) if err.is_degradation() => {
                    self.metrics.record_unavailable(i);
                    warn!(tier = tier.name(), %err, "tier skipped during pattern scan");
                }
                Err(err) => return Err(err),
            }
        }

        let mut removed = 0;
        for key in known {
            if glob_match(pattern, &key) && self.remove_everywhere(&key).await {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(pattern, removed, "pattern invalidated");
            self.metrics.record_invalidated(removed);
        }
        Ok(removed)
    }

    /// Drop everything: tiers, index, promotion counters.
    pub async fn clear(&self) -> Result<()> {
        for (i, tier) in self.tiers.iter().enumerate() {
            match tier.clear().await {
                Ok(()) => {}
                Err(err) if err.is_degradation() => {
                    self.metrics.record_unavailable(i);
                    warn!(tier = tier.name(), %err, "tier skipped during clear");
                }
                Err(err) => return Err(err),
            }
        }
        self.index.clear();
        self.promoter.clear();
        Ok(())
    }

    /// Typed read through the JSON serializer
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(self.serializer.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Typed write through the JSON serializer
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        options: SetOptions,
    ) -> Result<SetOutcome> {
        let bytes = self.serializer.encode(value)?;
        self.set(key, bytes, options).await
    }

    /// Counters snapshot
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Per-tier stats, fastest first
    pub fn tier_stats(&self) -> Vec<TierStats> {
        self.tiers.iter().map(|t| t.stats()).collect()
    }

    /// Run one sweep pass immediately: purge expired entries everywhere and
    /// demote idle fast-tier entries. The background task does the same on
    /// its interval; this entry point exists for deterministic tests and
    /// for hosts that schedule sweeps themselves.
    pub async fn sweep_now(&self) {
        let now = self.clock.now_millis();
        sweep_once(&self.tiers, &self.promoter, &self.metrics, now).await;
    }

    /// Stop the background sweep and wait for it to exit.
    pub async fn shutdown(&self) {
        let task = self.sweep.lock().take();
        if let Some(task) = task {
            task.cancel.cancel();
            let _ = task.handle.await;
        }
    }

    async fn maybe_promote(&self, key: &str, entry: &CacheEntry, tier_index: usize, now: u64) {
        if !self.promoter.record_hit(key, now) {
            return;
        }
        let target = &self.tiers[tier_index - 1];
        // The clone carries full metadata, so the absolute expiry (and with
        // it the remaining TTL) travels up unchanged.
        match target.store(entry.clone(), now).await {
            Ok(()) => {
                self.metrics.record_promotion();
                debug!(
                    key,
                    from = self.tiers[tier_index].name(),
                    to = target.name(),
                    "entry promoted"
                );
            }
            Err(err @ Error::CapacityExceeded { .. }) => {
                debug!(key, tier = target.name(), %err, "promotion rejected");
            }
            Err(err) => {
                self.metrics.record_unavailable(tier_index - 1);
                warn!(key, tier = target.name(), %err, "promotion target unavailable");
            }
        }
    }

    async fn remove_everywhere(&self, key: &str) -> bool {
        // Tiers hold independent copies, so the removals can fan out
        let results = join_all(self.tiers.iter().map(|tier| tier.remove(key))).await;
        let mut removed = false;
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(found) => removed |= found,
                Err(err) => {
                    self.metrics.record_unavailable(i);
                    let tier = self.tiers[i].name();
                    warn!(key, tier, %err, "tier skipped during removal");
                }
            }
        }
        self.index.remove_from_index(key);
        self.promoter.forget(key);
        removed
    }

    fn spawn_sweep(
        interval: Duration,
        tiers: Vec<Arc<Tier>>,
        promoter: Arc<PromotionController>,
        metrics: Arc<CacheMetrics>,
        clock: Arc<dyn Clock>,
    ) -> SweepTask {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // A sweep that overruns its tick skips the missed one instead of
            // running two sweeps back to back
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = clock.now_millis();
                        sweep_once(&tiers, &promoter, &metrics, now).await;
                    }
                }
            }
            debug!("sweep task stopped");
        });
        SweepTask { cancel, handle }
    }
}

impl Drop for MultiTierCache {
    fn drop(&mut self) {
        if let Some(task) = self.sweep.lock().take() {
            task.cancel.cancel();
        }
    }
}

/// One sweep pass: lazy-expiry cleanup on every tier, then idle-demotion on
/// the fastest tier only. Demotion there is pure eviction; lower tiers keep
/// their copies.
async fn sweep_once(
    tiers: &[Arc<Tier>],
    promoter: &PromotionController,
    metrics: &CacheMetrics,
    now: u64,
) {
    for tier in tiers {
        match tier.purge_expired(now).await {
            Ok(purged) if purged > 0 => {
                metrics.record_expired(purged as u64);
                debug!(tier = tier.name(), purged, "expired entries purged");
            }
            Ok(_) => {}
            Err(err) => {
                warn!(tier = tier.name(), %err, "tier skipped during sweep");
            }
        }
    }

    if let Some(fastest) = tiers.first() {
        match fastest.scan().await {
            Ok(snapshot) => {
                for key in promoter.idle_victims(&snapshot, now) {
                    match fastest.remove(&key).await {
                        Ok(true) => {
                            metrics.record_demotion();
                            promoter.forget(&key);
                            debug!(key, tier = fastest.name(), "idle entry demoted");
                        }
                        Ok(false) => {}
                        Err(err) => {
                            warn!(key, %err, "demotion removal failed");
                        }
                    }
                }
            }
            Err(err) => {
                warn!(tier = fastest.name(), %err, "fast tier scan failed during sweep");
            }
        }
    }

    metrics.record_sweep();
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{InMemoryRemoteStore, RemoteTier};

    fn test_config() -> CacheConfig {
        CacheConfig {
            enable_sweep: false,
            ..CacheConfig::default()
        }
    }

    fn two_tier_cache(clock: Arc<ManualClock>) -> MultiTierCache {
        MultiTierCache::in_memory(
            test_config(),
            &[
                TierConfig::new("fast", 1024),
                TierConfig::new("bulk", 64 * 1024),
            ],
            clock,
        )
    }

    #[tokio::test]
    async fn test_read_your_write() {
        let clock = ManualClock::starting_at(1_000);
        let cache = two_tier_cache(clock);

        cache
            .set("k", Bytes::from_static(b"v"), SetOptions::default())
            .await
            .unwrap();

        assert_eq!(cache.get("k").await.unwrap().unwrap(), &b"v"[..]);
    }

    #[tokio::test]
    async fn test_set_writes_through_all_tiers() {
        let clock = ManualClock::starting_at(0);
        let cache = two_tier_cache(clock);

        let outcome = cache
            .set("k", Bytes::from_static(b"v"), SetOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.written, vec!["fast", "bulk"]);
        assert!(outcome.fully_written());
    }

    #[tokio::test]
    async fn test_oversized_entry_rejected_by_small_tier_only() {
        let clock = ManualClock::starting_at(0);
        let cache = two_tier_cache(clock);

        let big = Bytes::from(vec![0u8; 2048]);
        let outcome = cache.set("big", big, SetOptions::default()).await.unwrap();

        assert_eq!(outcome.rejected, vec!["fast"]);
        assert_eq!(outcome.written, vec!["bulk"]);
        // Still readable from the tier that took it
        assert!(cache.get("big").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ttl_expiry_with_manual_clock() {
        let clock = ManualClock::starting_at(0);
        let cache = two_tier_cache(clock.clone());

        cache
            .set(
                "user:1",
                Bytes::from_static(b"{\"name\":\"A\"}"),
                SetOptions::default().ttl(Duration::from_secs(60)),
            )
            .await
            .unwrap();

        assert!(cache.get("user:1").await.unwrap().is_some());
        clock.advance_secs(61);
        assert!(cache.get("user:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_and_idempotent_invalidation() {
        let clock = ManualClock::starting_at(0);
        let cache = two_tier_cache(clock);

        cache
            .set("k", Bytes::from_static(b"v"), SetOptions::default())
            .await
            .unwrap();

        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tag_invalidation() {
        let clock = ManualClock::starting_at(0);
        let cache = two_tier_cache(clock);

        cache
            .set(
                "k1",
                Bytes::from_static(b"a"),
                SetOptions::default().tag("T"),
            )
            .await
            .unwrap();
        cache
            .set(
                "k2",
                Bytes::from_static(b"b"),
                SetOptions::default().tag("T"),
            )
            .await
            .unwrap();
        cache
            .set("k3", Bytes::from_static(b"c"), SetOptions::default())
            .await
            .unwrap();

        assert_eq!(cache.invalidate_tag("T").await.unwrap(), 2);
        assert!(cache.get("k1").await.unwrap().is_none());
        assert!(cache.get("k2").await.unwrap().is_none());
        assert!(cache.get("k3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dependency_cascade() {
        let clock = ManualClock::starting_at(0);
        let cache = two_tier_cache(clock);

        cache
            .set("parent", Bytes::from_static(b"p"), SetOptions::default())
            .await
            .unwrap();
        cache
            .set(
                "child",
                Bytes::from_static(b"c"),
                SetOptions::default().depends_on("parent"),
            )
            .await
            .unwrap();
        cache
            .set(
                "grandchild",
                Bytes::from_static(b"g"),
                SetOptions::default().depends_on("child"),
            )
            .await
            .unwrap();

        assert_eq!(cache.invalidate_dependency("parent").await.unwrap(), 3);
        assert!(cache.get("parent").await.unwrap().is_none());
        assert!(cache.get("child").await.unwrap().is_none());
        assert!(cache.get("grandchild").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dependency_cycle_terminates() {
        let clock = ManualClock::starting_at(0);
        let cache = two_tier_cache(clock);

        cache
            .set(
                "a",
                Bytes::from_static(b"1"),
                SetOptions::default().depends_on("b"),
            )
            .await
            .unwrap();
        cache
            .set(
                "b",
                Bytes::from_static(b"2"),
                SetOptions::default().depends_on("a"),
            )
            .await
            .unwrap();

        assert_eq!(cache.invalidate_dependency("a").await.unwrap(), 2);
        assert!(cache.get("a").await.unwrap().is_none());
        assert!(cache.get("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pattern_invalidation() {
        let clock = ManualClock::starting_at(0);
        let cache = two_tier_cache(clock);

        for key in ["user:1", "user:2", "session:1"] {
            cache
                .set(key, Bytes::from_static(b"v"), SetOptions::default())
                .await
                .unwrap();
        }

        assert_eq!(cache.invalidate_pattern("user:*").await.unwrap(), 2);
        assert!(cache.get("user:1").await.unwrap().is_none());
        assert!(cache.get("session:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_get_or_load_populates_tiers() {
        let clock = ManualClock::starting_at(0);
        let cache = two_tier_cache(clock);

        let value = cache
            .get_or_load("k", SetOptions::default(), || async {
                Ok(Bytes::from_static(b"loaded"))
            })
            .await
            .unwrap();

        assert_eq!(value, &b"loaded"[..]);
        assert!(cache.get("k").await.unwrap().is_some());
        assert_eq!(cache.metrics().stampede_leads, 1);
    }

    #[tokio::test]
    async fn test_loader_failure_caches_nothing() {
        let clock = ManualClock::starting_at(0);
        let cache = two_tier_cache(clock);

        let err = cache
            .get_or_load("k", SetOptions::default(), || async {
                Err::<Bytes, LoaderError>("db down".into())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::LoaderFailed { .. }));
        assert!(cache.get("k").await.unwrap().is_none());
        assert_eq!(cache.metrics().loader_failures, 1);
    }

    #[tokio::test]
    async fn test_cancelled_leader_releases_the_key() {
        let clock = ManualClock::starting_at(0);
        let cache = Arc::new(two_tier_cache(clock));

        let stalled = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_load("k", SetOptions::default(), || async {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(Bytes::from_static(b"stale"))
                    })
                    .await
            })
        };
        // Let the task take leadership, then cancel it mid-load
        tokio::task::yield_now().await;
        stalled.abort();
        assert!(stalled.await.unwrap_err().is_cancelled());
        assert_eq!(cache.guard.in_flight_count(), 0);

        // The key is free again; the next caller leads and loads
        let value = cache
            .get_or_load("k", SetOptions::default(), || async {
                Ok(Bytes::from_static(b"fresh"))
            })
            .await
            .unwrap();
        assert_eq!(value, &b"fresh"[..]);
    }

    #[tokio::test]
    async fn test_unwritten_set_leaves_index_untouched() {
        let clock = ManualClock::starting_at(0);
        let cache = two_tier_cache(clock);

        // Larger than every tier: rejected everywhere, so no indexing
        let huge = Bytes::from(vec![0u8; 128 * 1024]);
        let outcome = cache
            .set("huge", huge, SetOptions::default().tag("t"))
            .await
            .unwrap();
        assert!(!outcome.written_anywhere());
        assert!(cache.index.keys_for_tag("t").is_empty());
        assert_eq!(cache.invalidate_tag("t").await.unwrap(), 0);

        // A partial write still indexes
        let mid = Bytes::from(vec![0u8; 2048]);
        let outcome = cache
            .set("mid", mid, SetOptions::default().tag("t"))
            .await
            .unwrap();
        assert!(outcome.written_anywhere());
        let keys = cache.index.keys_for_tag("t");
        assert_eq!(keys.len(), 1);
        assert!(keys.contains("mid"));
    }

    #[tokio::test]
    async fn test_promotion_after_threshold() {
        let clock = ManualClock::starting_at(0);
        let cache = two_tier_cache(clock);

        cache
            .set("hot", Bytes::from_static(b"v"), SetOptions::default())
            .await
            .unwrap();
        // Drop it from the fast tier only; the bulk copy stays
        cache.tiers[0].remove("hot").await.unwrap();

        // Hits 1..2 count; hit 3 triggers the copy up
        for _ in 0..3 {
            assert!(cache.get("hot").await.unwrap().is_some());
        }

        assert!(cache.tiers[0].get("hot", 0).await.unwrap().is_some());
        assert_eq!(cache.metrics().promotions, 1);
    }

    #[tokio::test]
    async fn test_sweep_demotes_idle_fast_tier_entries() {
        let clock = ManualClock::starting_at(0);
        let cache = two_tier_cache(clock.clone());

        cache
            .set("idle", Bytes::from_static(b"v"), SetOptions::default())
            .await
            .unwrap();

        clock.advance_secs(101);
        cache.sweep_now().await;

        // Gone from the fast tier, still served from the bulk tier
        let now = clock.now_millis();
        assert!(cache.tiers[0].get("idle", now).await.unwrap().is_none());
        assert!(cache.get("idle").await.unwrap().is_some());
        assert_eq!(cache.metrics().demotions, 1);
    }

    #[tokio::test]
    async fn test_sweep_purges_expired_everywhere() {
        let clock = ManualClock::starting_at(0);
        let cache = two_tier_cache(clock.clone());

        cache
            .set(
                "short",
                Bytes::from_static(b"v"),
                SetOptions::default().ttl(Duration::from_secs(5)),
            )
            .await
            .unwrap();

        clock.advance_secs(6);
        cache.sweep_now().await;

        let snap = cache.metrics();
        assert_eq!(snap.expired_removals, 2);
        assert_eq!(snap.sweep_runs, 1);
    }

    #[tokio::test]
    async fn test_degraded_remote_tier_absorbed() {
        let clock = ManualClock::starting_at(0);
        let remote = Arc::new(InMemoryRemoteStore::new());
        let tiers = vec![
            Tier::new(
                1,
                "fast",
                1024,
                TierPolicy::lru(),
                Arc::new(MemoryStore::new()),
            ),
            Tier::new(
                2,
                "remote",
                u64::MAX,
                TierPolicy::lru(),
                Arc::new(RemoteTier::new(remote.clone())),
            ),
        ];
        let cache = MultiTierCache::new(test_config(), tiers, clock);

        remote.fail_with("connection refused");

        let outcome = cache
            .set("k", Bytes::from_static(b"v"), SetOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.written, vec!["fast"]);
        assert_eq!(outcome.degraded, vec!["remote"]);

        // Reads still succeed from the healthy tier
        assert!(cache.get("k").await.unwrap().is_some());
        assert!(cache.metrics().tiers[1].unavailable >= 1);
    }

    #[tokio::test]
    async fn test_clear_resets_everything() {
        let clock = ManualClock::starting_at(0);
        let cache = two_tier_cache(clock);

        cache
            .set(
                "k",
                Bytes::from_static(b"v"),
                SetOptions::default().tag("T"),
            )
            .await
            .unwrap();
        cache.clear().await.unwrap();

        assert!(cache.get("k").await.unwrap().is_none());
        assert_eq!(cache.invalidate_tag("T").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let clock = ManualClock::starting_at(0);
        let cache = two_tier_cache(clock);

        #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
        struct Profile {
            name: String,
        }

        cache
            .set_json(
                "user:1",
                &Profile { name: "A".into() },
                SetOptions::default(),
            )
            .await
            .unwrap();

        let profile: Profile = cache.get_json("user:1").await.unwrap().unwrap();
        assert_eq!(profile, Profile { name: "A".into() });
    }

    #[tokio::test]
    async fn test_background_sweep_shutdown() {
        let clock = ManualClock::starting_at(0);
        let cache = MultiTierCache::in_memory(
            CacheConfig {
                sweep_interval: Duration::from_millis(10),
                ..CacheConfig::default()
            },
            &[TierConfig::new("fast", 1024)],
            clock,
        );

        cache.shutdown().await;
        assert!(cache.sweep.lock().is_none());
    }
}
