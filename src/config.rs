//! Runtime configuration for tiered-cache.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! All tier-related knobs (capacities, TTLs, compression thresholds, eviction batch size)
//! live here.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "tiered-cache", about = "Inspect and maintain a tiered cache directory")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Maintenance operations exposed by the binary.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Look up a key and print its JSON value.
    Get { key: String },

    /// Store a JSON value under a key.
    Set {
        key: String,
        /// Value as a JSON document (e.g. '{"name":"Ann"}').
        value: String,
        /// TTL in milliseconds (defaults to each tier's own TTL).
        #[arg(long)]
        ttl_ms: Option<u64>,
    },

    /// Remove a key from every tier.
    Delete { key: String },

    /// Print a metrics snapshot.
    Stats {
        /// Render in Prometheus text exposition format instead of JSON.
        #[arg(long)]
        prometheus: bool,
    },

    /// Sweep expired entries and report what was freed.
    Optimize,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hot in-memory tier.
    pub l1: MemoryTierConfig,

    /// Compressed in-memory tier.
    pub l2: WarmTierConfig,

    /// Disk-backed tier.
    pub l3: DiskTierConfig,

    /// Eviction policy tuning.
    pub eviction: EvictionConfig,

    /// Compression settings.
    pub compression: CompressionConfig,

    /// Metrics reporting.
    pub metrics: MetricsConfig,
}

/// L1 settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryTierConfig {
    /// Whether the tier participates in lookups and writes.
    pub enabled: bool,

    /// Byte budget for estimated entry sizes.
    pub max_size: usize,

    /// Maximum number of entries.
    pub max_entries: usize,

    /// TTL applied when `set` is called without one, in milliseconds.
    pub default_ttl_ms: u64,
}

impl Default for MemoryTierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 50 * 1024 * 1024, // 50 MiB
            max_entries: 1000,
            default_ttl_ms: 5 * 60 * 1000, // 5 min
        }
    }
}

impl MemoryTierConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

/// L2 settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmTierConfig {
    pub enabled: bool,

    pub max_size: usize,

    pub max_entries: usize,

    pub default_ttl_ms: u64,

    /// Serialized values larger than this are candidates for compression.
    pub compression_threshold: usize,

    /// Minimum fractional size reduction for a compressed value to be kept (0.0 - 1.0).
    pub min_compression_ratio: f64,
}

impl Default for WarmTierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 200 * 1024 * 1024, // 200 MiB
            max_entries: 10_000,
            default_ttl_ms: 30 * 60 * 1000, // 30 min
            compression_threshold: 10 * 1024, // 10 KiB
            min_compression_ratio: 0.20,
        }
    }
}

impl WarmTierConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

/// L3 settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskTierConfig {
    pub enabled: bool,

    /// Byte budget for compressed files on disk.
    pub max_size: usize,

    pub max_entries: usize,

    pub default_ttl_ms: u64,

    /// Directory holding entry files and `index.json`.
    pub cache_dir: PathBuf,

    /// Upper bound on a single disk operation before it is treated as failed.
    pub operation_timeout_ms: u64,
}

impl Default for DiskTierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 1024 * 1024 * 1024, // 1 GiB
            max_entries: 100_000,
            default_ttl_ms: 24 * 60 * 60 * 1000, // 24 h
            cache_dir: PathBuf::from(".cache/l3"),
            operation_timeout_ms: 5_000,
        }
    }
}

impl DiskTierConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Eviction tuning shared by the memory tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    /// Maximum fraction of a tier's entries evicted by a single `set` (at least one).
    pub batch_fraction: f64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            batch_fraction: 0.10,
        }
    }
}

/// Compression settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// zstd compression level (1-22).
    pub zstd_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self { zstd_level: 3 }
    }
}

/// Metrics reporting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Interval between snapshots published by the reporter task.
    pub report_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 30,
        }
    }
}

impl MetricsConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs.max(1))
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            serde_json::from_str::<Config>(&data)?
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make a tier unusable.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.l1.enabled && (self.l1.max_size == 0 || self.l1.max_entries == 0) {
            anyhow::bail!("l1 is enabled but has zero capacity");
        }
        if self.l2.enabled && (self.l2.max_size == 0 || self.l2.max_entries == 0) {
            anyhow::bail!("l2 is enabled but has zero capacity");
        }
        if self.l3.enabled && (self.l3.max_size == 0 || self.l3.max_entries == 0) {
            anyhow::bail!("l3 is enabled but has zero capacity");
        }
        if self.l3.enabled && self.l3.operation_timeout_ms == 0 {
            anyhow::bail!("l3.operation_timeout_ms must be positive");
        }
        if !(0.0..1.0).contains(&self.l2.min_compression_ratio) {
            anyhow::bail!(
                "l2.min_compression_ratio must be in [0, 1), got {}",
                self.l2.min_compression_ratio
            );
        }
        if !(self.eviction.batch_fraction > 0.0 && self.eviction.batch_fraction <= 1.0) {
            anyhow::bail!(
                "eviction.batch_fraction must be in (0, 1], got {}",
                self.eviction.batch_fraction
            );
        }
        if !(1..=22).contains(&self.compression.zstd_level) {
            anyhow::bail!(
                "compression.zstd_level must be in 1..=22, got {}",
                self.compression.zstd_level
            );
        }
        Ok(())
    }

    /// Configuration for a cache rooted at `dir`, keeping the remaining defaults.
    pub fn with_cache_dir(dir: impl Into<PathBuf>) -> Self {
        let mut config = Config::default();
        config.l3.cache_dir = dir.into();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert!(cfg.l1.enabled && cfg.l2.enabled && cfg.l3.enabled);
        assert_eq!(cfg.l2.compression_threshold, 10 * 1024);
        assert_eq!(cfg.l3.cache_dir, PathBuf::from(".cache/l3"));
        assert!(cfg.l1.default_ttl() < cfg.l2.default_ttl());
        assert!(cfg.l2.default_ttl() < cfg.l3.default_ttl());
        cfg.validate().unwrap();
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: Config =
            serde_json::from_str(r#"{"l1": {"max_entries": 3}, "l3": {"enabled": false}}"#)
                .unwrap();
        assert_eq!(cfg.l1.max_entries, 3);
        assert_eq!(cfg.l1.max_size, MemoryTierConfig::default().max_size);
        assert!(!cfg.l3.enabled);
        assert!(cfg.l2.enabled);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.l1.max_entries = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.compression.zstd_level = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.l3.operation_timeout_ms = 0;
        assert!(cfg.validate().is_err());

        // A disabled tier may have zero capacity.
        let mut cfg = Config::default();
        cfg.l3.enabled = false;
        cfg.l3.max_size = 0;
        cfg.validate().unwrap();
    }

    #[test]
    fn test_load_missing_file_falls_back() {
        let cfg = Config::load(std::path::Path::new("/nonexistent/tiered-cache.json")).unwrap();
        assert_eq!(cfg.metrics.report_interval_secs, 30);
    }
}
