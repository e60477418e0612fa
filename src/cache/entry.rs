//! Cache entry types and tier definitions.
//!
//! An entry is the unit of storage in the memory tiers. It is created on `set`,
//! mutated only by hit accounting on read, and dropped on delete, expiry, or eviction.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Identifies one level of the cache hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    /// Tier 1: hot in-memory map.
    L1,
    /// Tier 2: in-memory map with transparent compression.
    L2,
    /// Tier 3: disk-backed store.
    L3,
}

impl Tier {
    /// All tiers, fastest first.
    pub const ALL: [Tier; 3] = [Tier::L1, Tier::L2, Tier::L3];

    /// Returns the numeric tier level (lower = faster).
    pub fn level(&self) -> u8 {
        match self {
            Tier::L1 => 1,
            Tier::L2 => 2,
            Tier::L3 => 3,
        }
    }

    /// Returns the next faster tier, or None if already hottest.
    pub fn promote(&self) -> Option<Tier> {
        match self {
            Tier::L1 => None,
            Tier::L2 => Some(Tier::L1),
            Tier::L3 => Some(Tier::L2),
        }
    }

    /// Returns the next slower tier, or None if already coldest.
    pub fn demote(&self) -> Option<Tier> {
        match self {
            Tier::L1 => Some(Tier::L2),
            Tier::L2 => Some(Tier::L3),
            Tier::L3 => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::L1 => write!(f, "L1"),
            Tier::L2 => write!(f, "L2"),
            Tier::L3 => write!(f, "L3"),
        }
    }
}

/// The stored form of a value.
///
/// `Compressed` holds the zstd-compressed serialized value and is resolved back
/// into `T` at read time.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue<T> {
    Plain(T),
    Compressed(Vec<u8>),
}

/// A single entry in a memory tier.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// Caller-supplied logical key.
    pub key: String,

    /// Payload, plain or compressed.
    pub value: StoredValue<T>,

    /// When the entry was written into this tier.
    pub created_at: Instant,

    /// Relative expiry; the entry is stale once `created_at + ttl` has passed.
    pub ttl: Duration,

    /// Successful reads since creation.
    pub hit_count: u64,

    /// Estimated size counted against the tier's byte budget.
    pub size_bytes: usize,
}

impl<T> CacheEntry<T> {
    pub fn new(key: impl Into<String>, value: StoredValue<T>, ttl: Duration, size_bytes: usize) -> Self {
        Self {
            key: key.into(),
            value,
            created_at: Instant::now(),
            ttl,
            hit_count: 0,
            size_bytes,
        }
    }

    /// Whether the entry has outlived its TTL at `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) > self.ttl
    }

    pub fn age_at(&self, now: Instant) -> Duration {
        now.duration_since(self.created_at)
    }

    /// Record a successful read.
    pub fn touch(&mut self) {
        self.hit_count += 1;
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.value, StoredValue::Compressed(_))
    }
}
