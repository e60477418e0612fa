//! Cache metrics: per-tier counters, aggregate snapshots, and exporters.
//!
//! Snapshots are produced on demand by `MultiTierCache::report_metrics`. A host can
//! drive that on its own schedule or hand the cache to [`spawn_metrics_reporter`].

use std::sync::Arc;
use std::time::Duration;

use prometheus::{Encoder, Gauge, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::cache::entry::Tier;
use crate::cache::multi_tier::MultiTierCache;
use crate::transfer::disk_io::DiskIoStats;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Counters for a single tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Resident entries.
    pub entries: usize,
    /// Bytes counted against the tier budget.
    pub size: usize,
}

impl TierStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

/// A point-in-time view of the whole cache.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetrics {
    pub l1: TierStats,
    pub l2: TierStats,
    pub l3: TierStats,

    /// Lookups answered by any tier over all lookups (0.0 - 1.0).
    pub total_hit_rate: f64,

    /// Combined L1 + L2 byte usage in MB.
    pub memory_efficiency: f64,

    /// Values copied into a faster tier after a lower-tier hit.
    pub promotions: u64,

    /// Lookups made through the orchestrator.
    pub lookups: u64,

    /// L3 file traffic. Zero when L3 is disabled.
    pub disk: DiskIoStats,
}

impl CacheMetrics {
    pub fn new(l1: TierStats, l2: TierStats, l3: TierStats, lookups: u64, hits: u64, promotions: u64) -> Self {
        let total_hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };
        Self {
            l1,
            l2,
            l3,
            total_hit_rate,
            memory_efficiency: (l1.size + l2.size) as f64 / BYTES_PER_MB,
            promotions,
            lookups,
            disk: DiskIoStats::default(),
        }
    }

    pub fn with_disk(mut self, disk: DiskIoStats) -> Self {
        self.disk = disk;
        self
    }

    pub fn tier(&self, tier: Tier) -> &TierStats {
        match tier {
            Tier::L1 => &self.l1,
            Tier::L2 => &self.l2,
            Tier::L3 => &self.l3,
        }
    }
}

/// Spawn a task that publishes a metrics snapshot every `interval`.
///
/// The task stops on its own once the cache is closed.
pub fn spawn_metrics_reporter<T>(cache: Arc<MultiTierCache<T>>, interval: Duration) -> JoinHandle<()>
where
    T: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if cache.is_closed() {
                debug!("Cache closed, stopping metrics reporter");
                break;
            }
            cache.report_metrics().await;
        }
    })
}

/// Mirrors metrics snapshots into a Prometheus registry.
pub struct PrometheusExporter {
    registry: Registry,
    hits: IntGaugeVec,
    misses: IntGaugeVec,
    evictions: IntGaugeVec,
    entries: IntGaugeVec,
    size_bytes: IntGaugeVec,
    hit_rate: Gauge,
    promotions: IntGauge,
    disk_bytes_written: IntGauge,
    disk_bytes_read: IntGauge,
    index_flushes: IntGauge,
}

impl PrometheusExporter {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("tiered_cache".to_string()), None)?;

        let tier_gauge = |name: &str, help: &str| -> prometheus::Result<IntGaugeVec> {
            let gauge = IntGaugeVec::new(Opts::new(name, help), &["tier"])?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };
        let hits = tier_gauge("hits", "Lookups answered by the tier")?;
        let misses = tier_gauge("misses", "Lookups the tier could not answer")?;
        let evictions = tier_gauge("evictions", "Entries evicted under pressure")?;
        let entries = tier_gauge("entries", "Resident entries")?;
        let size_bytes = tier_gauge("size_bytes", "Bytes counted against the tier budget")?;

        let hit_rate = Gauge::new("hit_rate", "Overall hit rate across tiers")?;
        registry.register(Box::new(hit_rate.clone()))?;
        let gauge = |name: &str, help: &str| -> prometheus::Result<IntGauge> {
            let gauge = IntGauge::new(name, help)?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };
        let promotions = gauge("promotions", "Values promoted toward L1")?;
        let disk_bytes_written = gauge("disk_bytes_written", "Bytes written to L3 entry files")?;
        let disk_bytes_read = gauge("disk_bytes_read", "Bytes read from L3 entry files")?;
        let index_flushes = gauge("index_flushes", "Times the L3 index was persisted")?;

        Ok(Self {
            registry,
            hits,
            misses,
            evictions,
            entries,
            size_bytes,
            hit_rate,
            promotions,
            disk_bytes_written,
            disk_bytes_read,
            index_flushes,
        })
    }

    pub fn update(&self, metrics: &CacheMetrics) {
        for tier in Tier::ALL {
            let stats = metrics.tier(tier);
            let label = tier.to_string();
            let labels: &[&str] = &[label.as_str()];
            self.hits.with_label_values(labels).set(stats.hits as i64);
            self.misses.with_label_values(labels).set(stats.misses as i64);
            self.evictions.with_label_values(labels).set(stats.evictions as i64);
            self.entries.with_label_values(labels).set(stats.entries as i64);
            self.size_bytes.with_label_values(labels).set(stats.size as i64);
        }
        self.hit_rate.set(metrics.total_hit_rate);
        self.promotions.set(metrics.promotions as i64);
        self.disk_bytes_written.set(metrics.disk.total_bytes_written as i64);
        self.disk_bytes_read.set(metrics.disk.total_bytes_read as i64);
        self.index_flushes.set(metrics.disk.index_flushes as i64);
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Log a snapshot at info level.
pub(crate) fn log_snapshot(metrics: &CacheMetrics) {
    info!(
        l1_hits = metrics.l1.hits,
        l1_misses = metrics.l1.misses,
        l1_entries = metrics.l1.entries,
        l2_hits = metrics.l2.hits,
        l2_misses = metrics.l2.misses,
        l2_entries = metrics.l2.entries,
        l3_hits = metrics.l3.hits,
        l3_misses = metrics.l3.misses,
        l3_entries = metrics.l3.entries,
        hit_rate = metrics.total_hit_rate,
        memory_mb = metrics.memory_efficiency,
        disk_bytes_written = metrics.disk.total_bytes_written,
        "Cache metrics"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(hits: u64, misses: u64, size: usize) -> TierStats {
        TierStats {
            hits,
            misses,
            size,
            entries: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_aggregate_rates() {
        let m = CacheMetrics::new(
            stats(3, 1, 512 * 1024),
            stats(1, 0, 512 * 1024),
            stats(0, 0, 10),
            4,
            3,
            1,
        );
        assert!((m.total_hit_rate - 0.75).abs() < 1e-10);
        assert!((m.memory_efficiency - 1.0).abs() < 1e-10);
        assert!((m.l1.hit_rate() - 0.75).abs() < 1e-10);
        assert_eq!(TierStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_snapshot_json_shape() {
        let m = CacheMetrics::default();
        let json = serde_json::to_value(&m).unwrap();
        assert!(json.get("totalHitRate").is_some());
        assert!(json.get("memoryEfficiency").is_some());
        assert!(json["disk"].get("totalBytesWritten").is_some());
        for field in ["hits", "misses", "size", "entries"] {
            assert!(json["l1"].get(field).is_some(), "missing {field}");
        }
    }

    #[test]
    fn test_prometheus_render() {
        let exporter = PrometheusExporter::new().unwrap();
        let disk = DiskIoStats {
            total_bytes_written: 4096,
            index_flushes: 3,
            ..Default::default()
        };
        let m = CacheMetrics::new(stats(7, 2, 100), stats(0, 2, 0), stats(1, 1, 50), 9, 8, 1)
            .with_disk(disk);
        exporter.update(&m);

        let text = exporter.render().unwrap();
        assert!(text.contains("tiered_cache_hits{tier=\"L1\"} 7"));
        assert!(text.contains("tiered_cache_size_bytes{tier=\"L3\"} 50"));
        assert!(text.contains("tiered_cache_promotions 1"));
        assert!(text.contains("tiered_cache_disk_bytes_written 4096"));
        assert!(text.contains("tiered_cache_index_flushes 3"));
    }
}
