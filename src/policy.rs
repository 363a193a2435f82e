//! Tier Admission and Eviction Policy
//!
//! Eviction victims are selected deterministically: expired entries first,
//! then oldest last-access, ties broken by lowest access count, remaining
//! ties by key ordering. Determinism matters: two nodes evicting under the
//! same snapshot pick the same victim.

use crate::store::EntrySummary;

/// Per-tier admission/eviction policy
#[derive(Debug, Clone)]
pub struct TierPolicy {
    /// Policy name (for logs)
    pub name: String,
    /// Entries smaller than this are not admitted (0 = no minimum)
    pub min_entry_size: u64,
    /// Entries larger than this are not admitted even to an empty tier
    pub max_entry_size: Option<u64>,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self::lru()
    }
}

impl TierPolicy {
    /// Recency-based policy with no size gates
    pub fn lru() -> Self {
        Self {
            name: "LRU".to_string(),
            min_entry_size: 0,
            max_entry_size: None,
        }
    }

    /// Skip objects below `min` (reduces churn on slower tiers)
    pub fn size_bounded(min: u64, max: Option<u64>) -> Self {
        Self {
            name: "Size-Bounded".to_string(),
            min_entry_size: min,
            max_entry_size: max,
        }
    }

    /// Should an entry of `size` bytes enter a tier with the given capacity?
    ///
    /// Pressure is handled by the eviction loop; admission only rejects
    /// entries that can never fit or fall outside the size gates.
    pub fn admit(&self, size: u64, capacity: u64) -> bool {
        if size > capacity {
            return false;
        }
        if size < self.min_entry_size {
            return false;
        }
        if let Some(max) = self.max_entry_size {
            if size > max {
                return false;
            }
        }
        true
    }

    /// Select the next eviction victim from a tier snapshot.
    ///
    /// `protect` is the key currently being stored; it is never its own
    /// victim.
    pub fn select_victim(
        &self,
        snapshot: &[EntrySummary],
        now_ms: u64,
        protect: Option<&str>,
    ) -> Option<String> {
        snapshot
            .iter()
            .filter(|s| protect != Some(s.key.as_str()))
            .min_by(|a, b| {
                // Expired entries are always the first to go
                let a_expired = a.is_expired(now_ms);
                let b_expired = b.is_expired(now_ms);
                b_expired
                    .cmp(&a_expired)
                    .then(a.last_access.cmp(&b.last_access))
                    .then(a.access_count.cmp(&b.access_count))
                    .then(a.key.cmp(&b.key))
            })
            .map(|s| s.key.clone())
    }
}

// =============================================================================
// Tests
// =============================================================================
