//! Multi-Tier Caching Engine
//!
//! A caching subsystem over N ordered tiers (1 = fastest/smallest .. N =
//! slowest/largest), with TTL expiry, LRU eviction, hit-count promotion,
//! tag/dependency/pattern invalidation, and single-flight stampede
//! protection for miss recomputation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      MultiTierCache                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Tier 1 (memory)     │ Tier 2 (disk)      │ Tier N (remote)      │
//! │ ┌────────────────┐  │ ┌───────────────┐  │ ┌────────────────┐   │
//! │ │ ShardedMap     │  │ │ DiskIndex     │  │ │ RemoteStore    │   │
//! │ │ (256-way)      │  │ │ + summaries   │  │ │ (collaborator) │   │
//! │ └────────────────┘  │ └───────────────┘  │ └────────────────┘   │
//! │         │           │        │           │         │            │
//! │         └───────────┴────────┴───────────┴─────────┘            │
//! │                             │                                   │
//! │   PromotionController · InvalidationIndex · StampedeGuard       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads descend the tiers fastest-first; the fastest live copy wins.
//! Writes go through to every tier (each tier owns its own physical copy).
//! A hit below the top tier feeds a sliding-window counter; hot keys get
//! copied one rank up with their remaining TTL. A background sweep purges
//! expired entries and demotes idle fast-tier entries.
//!
//! # Design Principles
//!
//! - Shard-level locking only; no global lock around the cache
//! - A missing key is `None`, never an error
//! - Tier outages degrade that tier's participation, not the operation
//! - All time flows through an injectable [`Clock`]

mod clock;
mod config;
mod entry;
mod error;
mod invalidation;
mod manager;
mod metrics;
mod policy;
mod promotion;
mod serializer;
mod shard;
mod stampede;
mod store;
mod tier;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, PromotionConfig, TierConfig};
pub use entry::{CacheEntry, CacheKey, EntryMetadata, EntryRecord};
pub use error::{Error, Result};
pub use invalidation::{glob_match, InvalidationIndex};
pub use manager::{LoaderError, MultiTierCache, SetOptions, SetOutcome};
pub use metrics::{CacheMetrics, MetricsSnapshot, TierCounters, TierSnapshot};
pub use policy::TierPolicy;
pub use promotion::PromotionController;
pub use serializer::{JsonSerializer, Serializer};
pub use shard::ShardedMap;
pub use stampede::{Flight, FlightLease, FlightOutcome, StampedeGuard, WaitResult};
pub use store::{
    DiskIndex, DiskStore, EntrySummary, InMemoryDiskIndex, InMemoryRemoteStore, MemoryStore,
    RemoteStore, RemoteTier, TierBackend,
};
pub use tier::{Tier, TierStats};

/// Shard count for in-memory tier maps. Power of two so key hashes mask
/// cleanly onto shards.
pub const SHARD_COUNT: usize = 256;
