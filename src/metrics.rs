//! Cache Metrics Collection
//!
//! Lock-free counters for monitoring cache health. Per-tier counters are
//! indexed by tier rank; global counters cover promotion, invalidation,
//! stampede coalescing, and the background sweep. All updates use relaxed
//! atomics, so recording is cheap on hot paths.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one tier
#[derive(Debug, Default)]
pub struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    unavailable: AtomicU64,
}

impl TierCounters {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn unavailable(&self) -> u64 {
        self.unavailable.load(Ordering::Relaxed)
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }
}

/// Cache metrics collector
#[derive(Debug)]
pub struct CacheMetrics {
    tiers: Vec<TierCounters>,

    // Promotion / demotion
    promotions: AtomicU64,
    demotions: AtomicU64,

    // Invalidation
    invalidated_keys: AtomicU64,
    expired_removals: AtomicU64,

    // Stampede coalescing
    stampede_leads: AtomicU64,
    stampede_waits: AtomicU64,
    loader_failures: AtomicU64,

    // Background sweep
    sweep_runs: AtomicU64,
}

impl CacheMetrics {
    /// Create a collector for `tier_count` tiers
    pub fn new(tier_count: usize) -> Self {
        Self {
            tiers: (0..tier_count).map(|_| TierCounters::default()).collect(),
            promotions: AtomicU64::new(0),
            demotions: AtomicU64::new(0),
            invalidated_keys: AtomicU64::new(0),
            expired_removals: AtomicU64::new(0),
            stampede_leads: AtomicU64::new(0),
            stampede_waits: AtomicU64::new(0),
            loader_failures: AtomicU64::new(0),
            sweep_runs: AtomicU64::new(0),
        }
    }

    /// Counters for the tier at `index` (rank - 1)
    pub fn tier(&self, index: usize) -> &TierCounters {
        &self.tiers[index]
    }

    pub fn record_hit(&self, index: usize) {
        self.tiers[index].hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self, index: usize) {
        self.tiers[index].misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self, index: usize) {
        self.tiers[index].writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unavailable(&self, index: usize) {
        self.tiers[index].unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_demotion(&self) {
        self.demotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidated(&self, count: u64) {
        self.invalidated_keys.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_expired(&self, count: u64) {
        self.expired_removals
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_stampede_lead(&self) {
        self.stampede_leads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stampede_wait(&self) {
        self.stampede_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_loader_failure(&self) {
        self.loader_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sweep(&self) {
        self.sweep_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn promotions(&self) -> u64 {
        self.promotions.load(Ordering::Relaxed)
    }

    pub fn demotions(&self) -> u64 {
        self.demotions.load(Ordering::Relaxed)
    }

    pub fn loader_failures(&self) -> u64 {
        self.loader_failures.load(Ordering::Relaxed)
    }

    pub fn sweep_runs(&self) -> u64 {
        self.sweep_runs.load(Ordering::Relaxed)
    }

    /// Hit ratio across all tiers: any tier hit over total lookups
    pub fn overall_hit_ratio(&self) -> f64 {
        let hits: u64 = self.tiers.iter().map(|t| t.hits()).sum();
        // A lookup that misses every tier counts once, as the last tier's miss
        let misses = self
            .tiers
            .last()
            .map(|t| t.misses())
            .unwrap_or(0);
        let total = (hits + misses) as f64;
        if total == 0.0 {
            0.0
        } else {
            hits as f64 / total
        }
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tiers: self
                .tiers
                .iter()
                .map(|t| TierSnapshot {
                    hits: t.hits(),
                    misses: t.misses(),
                    writes: t.writes(),
                    unavailable: t.unavailable(),
                    hit_ratio: t.hit_ratio(),
                })
                .collect(),
            promotions: self.promotions.load(Ordering::Relaxed),
            demotions: self.demotions.load(Ordering::Relaxed),
            invalidated_keys: self.invalidated_keys.load(Ordering::Relaxed),
            expired_removals: self.expired_removals.load(Ordering::Relaxed),
            stampede_leads: self.stampede_leads.load(Ordering::Relaxed),
            stampede_waits: self.stampede_waits.load(Ordering::Relaxed),
            loader_failures: self.loader_failures.load(Ordering::Relaxed),
            sweep_runs: self.sweep_runs.load(Ordering::Relaxed),
            overall_hit_ratio: self.overall_hit_ratio(),
        }
    }
}

/// Point-in-time counters for one tier
#[derive(Debug, Clone)]
pub struct TierSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub unavailable: u64,
    pub hit_ratio: f64,
}

/// Point-in-time view of all metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub tiers: Vec<TierSnapshot>,
    pub promotions: u64,
    pub demotions: u64,
    pub invalidated_keys: u64,
    pub expired_removals: u64,
    pub stampede_leads: u64,
    pub stampede_waits: u64,
    pub loader_failures: u64,
    pub sweep_runs: u64,
    pub overall_hit_ratio: f64,
}

// =============================================================================
// Tests
// =============================================================================
