//! Multi-tier cache.
//!
//! This module contains the cache data structures and algorithms:
//! - [`entry`]: Tier, CacheEntry, StoredValue definitions
//! - [`serializer`]: pluggable value encoding
//! - [`compressor`]: zstd compression, conditional for L2, unconditional for L3
//! - [`evictor`]: eviction policies (popularity, weighted LRU, oldest-first)
//! - [`memory`]: bounded entry map shared by the memory tiers
//! - [`hot`], [`warm`], [`cold`]: the L1, L2 and L3 tiers
//! - [`multi_tier`]: the orchestrator that looks up, promotes, and fans out writes
//! - [`metrics`]: snapshots, the reporter task, and the Prometheus exporter

pub mod cold;
pub mod compressor;
pub mod entry;
pub mod evictor;
pub mod hot;
pub mod memory;
pub mod metrics;
pub mod multi_tier;
pub mod serializer;
pub mod warm;
