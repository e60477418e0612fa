//! The public cache: composes L1, L2 and L3.
//!
//! Lookups go top-down and copy a value found in a slower tier into every faster
//! enabled tier. Writes fan out to all enabled tiers concurrently and succeed if
//! any tier accepts them. Failures inside a tier surface as a miss or a `false`
//! return, never as an error.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::cold::ColdTier;
use crate::cache::compressor::Compressor;
use crate::cache::entry::Tier;
use crate::cache::hot::HotTier;
use crate::cache::metrics::{log_snapshot, spawn_metrics_reporter, CacheMetrics, TierStats};
use crate::cache::serializer::Serializer;
use crate::cache::warm::WarmTier;
use crate::config::Config;
use crate::transfer::disk_io::DiskIoError;

/// Snapshots buffered per metrics subscriber before old ones are dropped.
const METRICS_CHANNEL_CAPACITY: usize = 16;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Disk tier failure: {0}")]
    DiskTier(#[from] DiskIoError),
}

/// A successful lookup and the tier that answered it.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit<T> {
    pub value: T,
    pub tier: Tier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Active,
    Closed,
}

/// Result of an explicit maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OptimizeReport {
    pub expired_removed: usize,
    pub bytes_freed: usize,
}

/// The multi-tier cache.
///
/// Each tier is guarded by its own lock; tiers never lock each other, and
/// promotion only ever moves data toward L1.
pub struct MultiTierCache<T> {
    l1: Option<Mutex<HotTier<T>>>,
    l2: Option<Mutex<WarmTier<T>>>,
    l3: Option<Mutex<ColdTier<T>>>,
    config: Config,
    closed: AtomicBool,
    lookups: AtomicU64,
    hits: AtomicU64,
    promotions: AtomicU64,
    metrics_tx: broadcast::Sender<CacheMetrics>,
}

impl<T> MultiTierCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Build the enabled tiers. Opening L3 creates its directory, loads the
    /// persisted index, and sweeps expired entries.
    pub async fn open(config: Config, serializer: Arc<dyn Serializer<T>>) -> Result<Self, CacheError> {
        config
            .validate()
            .map_err(|e| CacheError::Config(e.to_string()))?;

        let compressor = Compressor::new(config.compression.clone());

        let l1 = config
            .l1
            .enabled
            .then(|| Mutex::new(HotTier::new(&config.l1, &config.eviction, serializer.clone())));
        let l2 = config.l2.enabled.then(|| {
            Mutex::new(WarmTier::new(
                &config.l2,
                &config.eviction,
                serializer.clone(),
                compressor.clone(),
            ))
        });
        let l3 = if config.l3.enabled {
            Some(Mutex::new(
                ColdTier::open(&config.l3, serializer, compressor).await?,
            ))
        } else {
            None
        };

        info!(
            l1 = config.l1.enabled,
            l2 = config.l2.enabled,
            l3 = config.l3.enabled,
            cache_dir = %config.l3.cache_dir.display(),
            "Cache opened"
        );

        let (metrics_tx, _) = broadcast::channel(METRICS_CHANNEL_CAPACITY);
        Ok(Self {
            l1,
            l2,
            l3,
            config,
            closed: AtomicBool::new(false),
            lookups: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            promotions: AtomicU64::new(0),
            metrics_tx,
        })
    }

    pub async fn get(&self, key: &str) -> Option<T> {
        self.lookup(key).await.map(|hit| hit.value)
    }

    /// Look a key up in L1, then L2, then L3, promoting lower-tier hits.
    pub async fn lookup(&self, key: &str) -> Option<CacheHit<T>> {
        if self.is_closed() {
            return None;
        }
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let found = self.find(key).await;
        match &found {
            Some(hit) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, tier = %hit.tier, "Cache hit");
                if hit.tier != Tier::L1 {
                    self.promote(key, &hit.value, hit.tier).await;
                }
            }
            None => debug!(key, "Cache miss"),
        }
        found
    }

    async fn find(&self, key: &str) -> Option<CacheHit<T>> {
        if let Some(l1) = &self.l1 {
            let value = l1.lock().await.get(key);
            if let Some(value) = value {
                return Some(CacheHit { value, tier: Tier::L1 });
            }
        }
        if let Some(l2) = &self.l2 {
            let value = l2.lock().await.get(key);
            if let Some(value) = value {
                return Some(CacheHit { value, tier: Tier::L2 });
            }
        }
        if let Some(l3) = &self.l3 {
            if let Some(value) = self.cold_get(l3, key).await {
                return Some(CacheHit { value, tier: Tier::L3 });
            }
        }
        None
    }

    /// Copy a value found in `from` into every faster enabled tier.
    ///
    /// Best-effort: a tier that rejects the value is skipped.
    async fn promote(&self, key: &str, value: &T, from: Tier) {
        let mut target = from.promote();
        while let Some(tier) = target {
            let accepted = match tier {
                Tier::L1 => match &self.l1 {
                    Some(l1) => l1.lock().await.set(key, value.clone(), self.config.l1.default_ttl()),
                    None => false,
                },
                Tier::L2 => match &self.l2 {
                    Some(l2) => l2.lock().await.set(key, value.clone(), self.config.l2.default_ttl()),
                    None => false,
                },
                Tier::L3 => false,
            };
            if accepted {
                self.promotions.fetch_add(1, Ordering::Relaxed);
                debug!(key, from = %from, to = %tier, "Promoted entry");
            }
            target = tier.promote();
        }
    }

    /// Write to every enabled tier concurrently.
    ///
    /// Without an explicit `ttl` each tier applies its own default. Returns `true`
    /// if at least one tier accepted the value.
    pub async fn set(&self, key: &str, value: T, ttl: Option<Duration>) -> bool {
        if self.is_closed() {
            return false;
        }

        let l1_ttl = ttl.unwrap_or_else(|| self.config.l1.default_ttl());
        let l2_ttl = ttl.unwrap_or_else(|| self.config.l2.default_ttl());
        let l3_ttl = ttl.unwrap_or_else(|| self.config.l3.default_ttl());

        let l1 = async {
            match &self.l1 {
                Some(l1) => l1.lock().await.set(key, value.clone(), l1_ttl),
                None => false,
            }
        };
        let l2 = async {
            match &self.l2 {
                Some(l2) => l2.lock().await.set(key, value.clone(), l2_ttl),
                None => false,
            }
        };
        let l3 = async {
            match &self.l3 {
                Some(l3) => self.cold_set(l3, key, &value, l3_ttl).await,
                None => false,
            }
        };

        let (in_l1, in_l2, in_l3) = tokio::join!(l1, l2, l3);
        debug!(key, l1 = in_l1, l2 = in_l2, l3 = in_l3, "Fan-out write");

        let accepted = in_l1 || in_l2 || in_l3;
        if !accepted {
            debug!(key, "No tier accepted the value");
        }
        accepted
    }

    /// Remove a key from every tier. Always succeeds.
    pub async fn delete(&self, key: &str) -> bool {
        if let Some(l1) = &self.l1 {
            l1.lock().await.delete(key);
        }
        if let Some(l2) = &self.l2 {
            l2.lock().await.delete(key);
        }
        if let Some(l3) = &self.l3 {
            self.cold_delete(l3, key).await;
        }
        true
    }

    async fn cold_get(&self, l3: &Mutex<ColdTier<T>>, key: &str) -> Option<T> {
        let timeout = self.config.l3.operation_timeout();
        match tokio::time::timeout(timeout, async { l3.lock().await.get(key).await }).await {
            Ok(value) => value,
            Err(_) => {
                warn!(key, ?timeout, "Cold tier read timed out, discarding entry");
                self.cold_delete(l3, key).await;
                None
            }
        }
    }

    async fn cold_set(&self, l3: &Mutex<ColdTier<T>>, key: &str, value: &T, ttl: Duration) -> bool {
        let timeout = self.config.l3.operation_timeout();
        match tokio::time::timeout(timeout, async { l3.lock().await.set(key, value, ttl).await }).await {
            Ok(accepted) => accepted,
            Err(_) => {
                // The cancelled write may already have committed its index entry.
                warn!(key, ?timeout, "Cold tier write timed out, discarding entry");
                self.cold_delete(l3, key).await;
                false
            }
        }
    }

    async fn cold_delete(&self, l3: &Mutex<ColdTier<T>>, key: &str) {
        let timeout = self.config.l3.operation_timeout();
        if tokio::time::timeout(timeout, async { l3.lock().await.delete(key).await })
            .await
            .is_err()
        {
            warn!(key, ?timeout, "Cold tier delete timed out");
        }
    }

    /// Aggregate counters across tiers. Disabled tiers report zeros.
    pub async fn metrics(&self) -> CacheMetrics {
        let l1 = match &self.l1 {
            Some(l1) => l1.lock().await.stats(),
            None => TierStats::default(),
        };
        let l2 = match &self.l2 {
            Some(l2) => l2.lock().await.stats(),
            None => TierStats::default(),
        };
        let (l3, disk) = match &self.l3 {
            Some(l3) => {
                let tier = l3.lock().await;
                (tier.stats(), tier.disk_stats())
            }
            None => Default::default(),
        };

        CacheMetrics::new(
            l1,
            l2,
            l3,
            self.lookups.load(Ordering::Relaxed),
            self.hits.load(Ordering::Relaxed),
            self.promotions.load(Ordering::Relaxed),
        )
        .with_disk(disk)
    }

    /// Take a snapshot, log it, and publish it to metrics subscribers.
    pub async fn report_metrics(&self) -> CacheMetrics {
        let metrics = self.metrics().await;
        log_snapshot(&metrics);
        // No subscribers is fine.
        let _ = self.metrics_tx.send(metrics.clone());
        metrics
    }

    /// Start a reporter task publishing snapshots every `metrics.report_interval_secs`.
    pub fn spawn_reporter(self: &Arc<Self>) -> JoinHandle<()> {
        spawn_metrics_reporter(Arc::clone(self), self.config.metrics.report_interval())
    }

    /// Receive every snapshot published by `report_metrics`.
    pub fn subscribe_metrics(&self) -> broadcast::Receiver<CacheMetrics> {
        self.metrics_tx.subscribe()
    }

    /// Sweep expired entries from every tier.
    pub async fn optimize(&self) -> OptimizeReport {
        let mut report = OptimizeReport::default();
        let mut add = |(removed, freed): (usize, usize)| {
            report.expired_removed += removed;
            report.bytes_freed += freed;
        };

        if let Some(l1) = &self.l1 {
            add(l1.lock().await.purge_expired());
        }
        if let Some(l2) = &self.l2 {
            add(l2.lock().await.purge_expired());
        }
        if let Some(l3) = &self.l3 {
            let timeout = self.config.l3.operation_timeout();
            match tokio::time::timeout(timeout, async { l3.lock().await.sweep_expired().await }).await {
                Ok(swept) => add(swept),
                Err(_) => warn!(?timeout, "Cold tier sweep timed out"),
            }
        }

        info!(
            removed = report.expired_removed,
            freed = report.bytes_freed,
            "Optimization pass complete"
        );
        report
    }

    /// Drop every entry held by one tier.
    pub async fn clear_tier(&self, tier: Tier) {
        match tier {
            Tier::L1 => {
                if let Some(l1) = &self.l1 {
                    l1.lock().await.clear();
                }
            }
            Tier::L2 => {
                if let Some(l2) = &self.l2 {
                    l2.lock().await.clear();
                }
            }
            Tier::L3 => {
                if let Some(l3) = &self.l3 {
                    l3.lock().await.clear().await;
                }
            }
        }
        debug!(tier = %tier, "Cleared tier");
    }

    /// Whether `tier` currently holds `key`, without counting a hit or miss.
    pub async fn contains_in(&self, tier: Tier, key: &str) -> bool {
        match tier {
            Tier::L1 => match &self.l1 {
                Some(l1) => l1.lock().await.contains(key),
                None => false,
            },
            Tier::L2 => match &self.l2 {
                Some(l2) => l2.lock().await.contains(key),
                None => false,
            },
            Tier::L3 => match &self.l3 {
                Some(l3) => l3.lock().await.contains(key),
                None => false,
            },
        }
    }

    pub fn is_enabled(&self, tier: Tier) -> bool {
        match tier {
            Tier::L1 => self.l1.is_some(),
            Tier::L2 => self.l2.is_some(),
            Tier::L3 => self.l3.is_some(),
        }
    }

    /// Flush the disk index and release memory tiers. Further lookups miss and
    /// writes are refused. Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), CacheError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(l1) = &self.l1 {
            l1.lock().await.clear();
        }
        if let Some(l2) = &self.l2 {
            l2.lock().await.clear();
        }
        if let Some(l3) = &self.l3 {
            l3.lock().await.flush().await?;
        }

        info!("Cache closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> CacheState {
        if self.is_closed() {
            CacheState::Closed
        } else {
            CacheState::Active
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::serializer::JsonSerializer;
    use tempfile::TempDir;

    async fn open(tmp: &TempDir) -> MultiTierCache<String> {
        MultiTierCache::open(
            Config::with_cache_dir(tmp.path().join("l3")),
            Arc::new(JsonSerializer::new()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_promotion_from_l2_fills_l1_only() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp).await;
        cache.set("k", "v".into(), None).await;
        cache.clear_tier(Tier::L1).await;

        let hit = cache.lookup("k").await.unwrap();
        assert_eq!(hit.tier, Tier::L2);
        assert!(cache.contains_in(Tier::L1, "k").await);
        assert_eq!(cache.metrics().await.promotions, 1);
    }

    #[tokio::test]
    async fn test_promotion_from_l3_fills_both() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp).await;
        cache.set("k", "v".into(), None).await;
        cache.clear_tier(Tier::L1).await;
        cache.clear_tier(Tier::L2).await;

        let hit = cache.lookup("k").await.unwrap();
        assert_eq!(hit.tier, Tier::L3);
        assert!(cache.contains_in(Tier::L2, "k").await);
        assert!(cache.contains_in(Tier::L1, "k").await);
        assert_eq!(cache.metrics().await.promotions, 2);
    }

    #[tokio::test]
    async fn test_closed_cache_refuses_work() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp).await;
        cache.set("k", "v".into(), None).await;

        cache.close().await.unwrap();
        cache.close().await.unwrap();
        assert_eq!(cache.state(), CacheState::Closed);
        assert_eq!(cache.get("k").await, None);
        assert!(!cache.set("k", "v".into(), None).await);
        assert!(cache.delete("k").await);
    }

    fn disk_only(tmp: &TempDir) -> Config {
        let mut config = Config::with_cache_dir(tmp.path().join("l3"));
        config.l1.enabled = false;
        config.l2.enabled = false;
        config.l3.operation_timeout_ms = 200;
        config
    }

    /// Hold the L3 lock for `hold`, starving cache operations that need it.
    async fn hold_cold_tier(cache: &MultiTierCache<String>, hold: Duration) {
        let guard = cache.l3.as_ref().unwrap().lock().await;
        tokio::time::sleep(hold).await;
        drop(guard);
    }

    #[tokio::test]
    async fn test_timed_out_cold_write_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let cache = MultiTierCache::<String>::open(disk_only(&tmp), Arc::new(JsonSerializer::new()))
            .await
            .unwrap();

        let (_, accepted) = tokio::join!(
            hold_cold_tier(&cache, Duration::from_millis(300)),
            cache.set("k", "v".to_string(), None)
        );
        assert!(!accepted);
        assert!(!cache.contains_in(Tier::L3, "k").await);
    }

    #[tokio::test]
    async fn test_timed_out_cold_read_discards_entry() {
        let tmp = TempDir::new().unwrap();
        let cache = MultiTierCache::<String>::open(disk_only(&tmp), Arc::new(JsonSerializer::new()))
            .await
            .unwrap();
        assert!(cache.set("k", "v".to_string(), None).await);

        // The read gives up at 200 ms; the lock frees at 300 ms, within the
        // follow-up delete's own timeout.
        let (_, value) = tokio::join!(
            hold_cold_tier(&cache, Duration::from_millis(300)),
            cache.get("k")
        );
        assert_eq!(value, None);
        assert!(!cache.contains_in(Tier::L3, "k").await);
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_reporter_uses_configured_interval() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::with_cache_dir(tmp.path().join("l3"));
        config.metrics.report_interval_secs = 1;
        let cache = Arc::new(
            MultiTierCache::<String>::open(config, Arc::new(JsonSerializer::new()))
                .await
                .unwrap(),
        );
        let mut rx = cache.subscribe_metrics();

        let reporter = cache.spawn_reporter();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no snapshot within the configured interval")
            .unwrap();
        assert_eq!(snapshot.lookups, 0);

        cache.close().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), reporter)
            .await
            .expect("reporter did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_metrics_include_disk_traffic() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp).await;
        cache.set("k", "v".into(), None).await;

        let metrics = cache.metrics().await;
        assert_eq!(metrics.disk.total_writes, 1);
        assert_eq!(metrics.disk.total_bytes_written, metrics.l3.size as u64);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = Config::default();
        config.l1.max_entries = 0;
        let result =
            MultiTierCache::<String>::open(config, Arc::new(JsonSerializer::new())).await;
        assert!(matches!(result, Err(CacheError::Config(_))));
    }

    #[tokio::test]
    async fn test_metrics_are_published() {
        let tmp = TempDir::new().unwrap();
        let cache = open(&tmp).await;
        let mut rx = cache.subscribe_metrics();

        cache.set("k", "v".into(), None).await;
        cache.get("k").await;
        cache.get("absent").await;
        let reported = cache.report_metrics().await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.lookups, 2);
        assert!((received.total_hit_rate - 0.5).abs() < 1e-10);
        assert_eq!(received.l1.entries, reported.l1.entries);
    }
}
