//! Cache Configuration
//!
//! Defaults: promote after 3 hits inside a 24h window, demote fast-tier
//! entries idle for more than 100s, sweep every 60s.

use std::time::Duration;

/// Promotion/demotion tuning
#[derive(Debug, Clone)]
pub struct PromotionConfig {
    /// Hits at a lower tier before an entry is copied one rank up
    pub promotion_threshold: u32,
    /// Sliding window the hits must fall into
    pub access_window: Duration,
    /// Fast-tier entries idle longer than this are demoted (evicted from
    /// rank 1; lower tiers keep their copies)
    pub demotion_idle_window: Duration,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            promotion_threshold: 3,
            access_window: Duration::from_secs(24 * 60 * 60),
            demotion_idle_window: Duration::from_secs(100),
        }
    }
}

/// Declarative description of one tier
#[derive(Debug, Clone)]
pub struct TierConfig {
    /// Tier name (for logs and errors)
    pub name: String,
    /// Capacity in bytes
    pub capacity: u64,
}

impl TierConfig {
    /// Build a tier description
    pub fn new(name: impl Into<String>, capacity: u64) -> Self {
        Self {
            name: name.into(),
            capacity,
        }
    }
}

/// Cache-wide configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Promotion/demotion tuning
    pub promotion: PromotionConfig,
    /// Interval between background sweeps
    pub sweep_interval: Duration,
    /// Whether the background sweep task runs at all
    pub enable_sweep: bool,
    /// How long a stampede waiter blocks for the in-flight computation
    /// before giving up with `Timeout`
    pub stampede_wait: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            promotion: PromotionConfig::default(),
            sweep_interval: Duration::from_secs(60),
            enable_sweep: true,
            stampede_wait: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = CacheConfig::default();
        assert_eq!(config.promotion.promotion_threshold, 3);
        assert_eq!(config.promotion.access_window, Duration::from_secs(86_400));
        assert_eq!(
            config.promotion.demotion_idle_window,
            Duration::from_secs(100)
        );
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert!(config.enable_sweep);
    }
}
