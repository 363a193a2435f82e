//! Stampede Guard
//!
//! Single-flight coalescing for cache misses. The first caller for a key
//! becomes the leader and runs the loader; concurrent callers for the same
//! key become followers and wait on a broadcast channel instead of issuing
//! duplicate loads. Distinct keys never contend with each other. Leadership
//! is held through an RAII lease, so a leader cancelled mid-load releases
//! the key instead of wedging it.

use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{Error, Result};

/// What the leader's load produced, fanned out to every follower
#[derive(Debug, Clone)]
pub enum FlightOutcome {
    /// Loader succeeded with this payload
    Loaded(Bytes),
    /// Loader failed; followers surface this as a load failure
    Failed(String),
}

/// A caller's position in the flight for a key
pub enum Flight<'a> {
    /// This caller runs the loader; the lease hands the outcome in
    Leader(FlightLease<'a>),
    /// This caller waits for the leader's outcome
    Follower(broadcast::Receiver<FlightOutcome>),
}

/// Leadership over the in-flight load for one key.
///
/// The lease is the only way to finish a flight: `complete` fans the
/// outcome out to followers. If the lease is dropped first (the leader's
/// future was cancelled mid-load), the in-flight entry is removed and
/// followers see their channel close, which sends them back through the
/// gate so a fresh leader can take over.
pub struct FlightLease<'a> {
    guard: &'a StampedeGuard,
    key: String,
    completed: bool,
}

impl FlightLease<'_> {
    /// Hand in the outcome and release the key.
    pub fn complete(mut self, outcome: FlightOutcome) {
        self.completed = true;
        self.guard.finish(&self.key, outcome);
    }
}

impl Drop for FlightLease<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.guard.abandon(&self.key);
        }
    }
}

/// What a follower observed while waiting
#[derive(Debug)]
pub enum WaitResult {
    /// The leader finished
    Outcome(FlightOutcome),
    /// The leader vanished without completing; retry through the gate
    Retry,
}

/// In-flight load registry keyed by cache key
pub struct StampedeGuard {
    in_flight: DashMap<String, broadcast::Sender<FlightOutcome>>,
    wait_timeout: Duration,
}

impl StampedeGuard {
    pub fn new(wait_timeout: Duration) -> Self {
        Self {
            in_flight: DashMap::new(),
            wait_timeout,
        }
    }

    /// Join the flight for `key`. The entry API makes the
    /// occupied-or-vacant decision atomic, so exactly one caller per key
    /// sees `Leader`.
    pub fn join(&self, key: &str) -> Flight<'_> {
        match self.in_flight.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                Flight::Follower(occupied.get().subscribe())
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let (tx, _rx) = broadcast::channel(1);
                vacant.insert(tx);
                Flight::Leader(FlightLease {
                    guard: self,
                    key: key.to_string(),
                    completed: false,
                })
            }
        }
    }

    /// The in-flight entry is removed before broadcasting, so a caller
    /// arriving after this point starts a fresh flight rather than
    /// observing a stale one.
    fn finish(&self, key: &str, outcome: FlightOutcome) {
        if let Some((_, tx)) = self.in_flight.remove(key) {
            // No receivers just means nobody waited
            let _ = tx.send(outcome);
        }
    }

    /// Remove the in-flight entry without broadcasting. Dropping the sender
    /// closes every follower's channel, which they treat as a retry signal.
    fn abandon(&self, key: &str) {
        if self.in_flight.remove(key).is_some() {
            debug!(key, "in-flight load abandoned");
        }
    }

    /// Follower side: wait for the leader's outcome, bounded by the
    /// configured timeout.
    pub async fn wait(
        &self,
        key: &str,
        mut rx: broadcast::Receiver<FlightOutcome>,
    ) -> Result<WaitResult> {
        match tokio::time::timeout(self.wait_timeout, rx.recv()).await {
            Ok(Ok(outcome)) => Ok(WaitResult::Outcome(outcome)),
            Ok(Err(_closed)) => Ok(WaitResult::Retry),
            Err(_elapsed) => Err(Error::Timeout {
                key: key.to_string(),
                waited_ms: self.wait_timeout.as_millis() as u64,
            }),
        }
    }

    /// Number of loads currently in flight
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn lead<'a>(guard: &'a StampedeGuard, key: &str) -> FlightLease<'a> {
        match guard.join(key) {
            Flight::Leader(lease) => lease,
            Flight::Follower(_) => panic!("expected leader"),
        }
    }

    fn follow(guard: &StampedeGuard, key: &str) -> broadcast::Receiver<FlightOutcome> {
        match guard.join(key) {
            Flight::Follower(rx) => rx,
            Flight::Leader(_) => panic!("expected follower"),
        }
    }

    #[tokio::test]
    async fn test_first_caller_leads() {
        let guard = StampedeGuard::new(Duration::from_secs(1));

        let _lease = lead(&guard, "k");
        assert!(matches!(guard.join("k"), Flight::Follower(_)));
        assert_eq!(guard.in_flight_count(), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_lead_independently() {
        let guard = StampedeGuard::new(Duration::from_secs(1));

        let _a = lead(&guard, "a");
        let _b = lead(&guard, "b");
        assert_eq!(guard.in_flight_count(), 2);
    }

    #[tokio::test]
    async fn test_complete_fans_out_and_clears() {
        let guard = StampedeGuard::new(Duration::from_secs(1));

        let lease = lead(&guard, "k");
        let rx = follow(&guard, "k");

        lease.complete(FlightOutcome::Loaded(Bytes::from_static(b"v")));

        match guard.wait("k", rx).await.unwrap() {
            WaitResult::Outcome(FlightOutcome::Loaded(v)) => assert_eq!(&v[..], b"v"),
            _ => panic!("expected loaded outcome"),
        }
        // Next caller starts a fresh flight
        assert!(matches!(guard.join("k"), Flight::Leader(_)));
    }

    #[tokio::test]
    async fn test_failure_reaches_followers() {
        let guard = StampedeGuard::new(Duration::from_secs(1));

        let lease = lead(&guard, "k");
        let rx = follow(&guard, "k");

        lease.complete(FlightOutcome::Failed("backend down".into()));

        match guard.wait("k", rx).await.unwrap() {
            WaitResult::Outcome(FlightOutcome::Failed(reason)) => {
                assert_eq!(reason, "backend down")
            }
            _ => panic!("expected failed outcome"),
        }
    }

    #[tokio::test]
    async fn test_dropped_lease_signals_retry() {
        let guard = StampedeGuard::new(Duration::from_secs(1));

        let lease = lead(&guard, "k");
        let rx = follow(&guard, "k");

        drop(lease);

        assert_eq!(guard.in_flight_count(), 0);
        assert!(matches!(guard.wait("k", rx).await.unwrap(), WaitResult::Retry));
        assert!(matches!(guard.join("k"), Flight::Leader(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let guard = StampedeGuard::new(Duration::from_millis(50));

        let _lease = lead(&guard, "k");
        let rx = follow(&guard, "k");

        // Leader never completes
        let err = guard.wait("k", rx).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }
}
