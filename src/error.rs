//! Error types for the multi-tier cache
//!
//! A missing key is not an error: lookups return `Option` and absence is a
//! normal negative result. The variants here cover the failures that actually
//! interrupt an operation.

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the multi-tier cache
#[derive(Error, Debug)]
pub enum Error {
    /// A tier rejected a store even after eviction attempts
    #[error("capacity exceeded on tier {tier}: entry needs {needed} bytes, capacity is {capacity}")]
    CapacityExceeded {
        tier: String,
        needed: u64,
        capacity: u64,
    },

    /// A tier's backing store is unreachable; the tier is skipped, not fatal
    #[error("tier {tier} unavailable: {reason}")]
    TierUnavailable { tier: String, reason: String },

    /// The caller-supplied loader failed; propagated verbatim to all waiters
    #[error("loader failed for key {key}: {reason}")]
    LoaderFailed { key: String, reason: String },

    /// A blocking wait exceeded its deadline
    #[error("timed out after {waited_ms}ms waiting on key {key}")]
    Timeout { key: String, waited_ms: u64 },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry record encode/decode error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// True if the error only degrades a single tier's participation
    /// (absorbed at the facade, surfaced through metrics)
    pub fn is_degradation(&self) -> bool {
        matches!(self, Error::TierUnavailable { .. })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = Error::CapacityExceeded {
            tier: "fast".into(),
            needed: 2048,
            capacity: 1024,
        };
        assert!(err.to_string().contains("fast"));
        assert!(err.to_string().contains("2048"));

        let err = Error::Timeout {
            key: "user:1".into(),
            waited_ms: 500,
        };
        assert!(err.to_string().contains("user:1"));
    }

    #[test]
    fn test_degradation_classification() {
        assert!(Error::TierUnavailable {
            tier: "remote".into(),
            reason: "connection refused".into()
        }
        .is_degradation());

        assert!(!Error::LoaderFailed {
            key: "k".into(),
            reason: "db down".into()
        }
        .is_degradation());
    }
}
