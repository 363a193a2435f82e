//! Promotion Controller
//!
//! Promotion is "pay once to speed up a hot key": a read hit at rank R > 1
//! bumps a per-key counter, and when the counter reaches the threshold
//! inside the sliding window the entry is copied one rank up. Demotion from
//! the fast tier is pure eviction: rank 1 capacity is the scarcest
//! resource and lower tiers still hold their copies.

use dashmap::DashMap;

use crate::config::PromotionConfig;
use crate::store::EntrySummary;

/// Per-key hit counter inside the current window
struct HitWindow {
    window_start_ms: u64,
    hits: u32,
}

/// Decides when lower-tier hits earn a copy-up and which fast-tier entries
/// have cooled down
pub struct PromotionController {
    config: PromotionConfig,
    counters: DashMap<String, HitWindow>,
}

impl PromotionController {
    /// Create a controller with the given tuning
    pub fn new(config: PromotionConfig) -> Self {
        Self {
            config,
            counters: DashMap::new(),
        }
    }

    /// Record a hit at a tier below the top.
    ///
    /// Returns `true` when the key has earned promotion one rank up; the
    /// counter resets so the next promotion starts a fresh window.
    ///
    /// The window is a restart-on-gap approximation of a sliding window:
    /// a hit arriving more than `access_window` after the window opened
    /// restarts the count rather than aging out individual hits. A burst
    /// straddling the boundary can therefore need one extra hit. This
    /// keeps the counter at two words per key instead of a timestamp ring.
    pub fn record_hit(&self, key: &str, now_ms: u64) -> bool {
        let window_ms = self.config.access_window.as_millis() as u64;
        let mut slot = self.counters.entry(key.to_string()).or_insert(HitWindow {
            window_start_ms: now_ms,
            hits: 0,
        });

        if now_ms.saturating_sub(slot.window_start_ms) > window_ms {
            slot.window_start_ms = now_ms;
            slot.hits = 0;
        }

        slot.hits += 1;
        if slot.hits >= self.config.promotion_threshold {
            slot.hits = 0;
            slot.window_start_ms = now_ms;
            true
        } else {
            false
        }
    }

    /// Drop counters for a key that was deleted or invalidated
    pub fn forget(&self, key: &str) {
        self.counters.remove(key);
    }

    /// Drop all counters
    pub fn clear(&self) {
        self.counters.clear();
    }

    /// Fast-tier keys idle past the demotion window, given a rank-1 scan
    pub fn idle_victims(&self, snapshot: &[EntrySummary], now_ms: u64) -> Vec<String> {
        let idle_ms = self.config.demotion_idle_window.as_millis() as u64;
        snapshot
            .iter()
            .filter(|s| now_ms.saturating_sub(s.last_access) > idle_ms)
            .map(|s| s.key.clone())
            .collect()
    }

    /// Number of keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.counters.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
