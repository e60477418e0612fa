//! tiered-cache: a multi-tier cache for a single process.
//!
//! Values move through a hierarchy of tiers:
//!   L1 hot in-memory → L2 compressed in-memory → L3 disk
//!
//! Reads check the tiers top-down and promote hits toward L1; writes fan out to
//! every enabled tier. Cache failures degrade to misses, never to errors.

pub mod cache;
pub mod config;
pub mod transfer;

pub use cache::entry::Tier;
pub use cache::metrics::{spawn_metrics_reporter, CacheMetrics, PrometheusExporter, TierStats};
pub use cache::multi_tier::{CacheError, CacheHit, CacheState, MultiTierCache, OptimizeReport};
pub use cache::serializer::{JsonSerializer, Serializer, SerializerError};
pub use config::Config;
pub use transfer::disk_io::DiskIoStats;
