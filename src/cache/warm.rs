//! L2: warm in-memory tier with transparent compression.
//!
//! Values whose serialized form exceeds `compression_threshold` and shrinks by at
//! least `min_compression_ratio` are kept as zstd bytes and decoded on read.
//! Entries that fail to decode are dropped and reported as misses.
//!
//! Eviction is weighted LRU: lowest `hit_count / age` goes first.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::compressor::Compressor;
use crate::cache::entry::{CacheEntry, StoredValue, Tier};
use crate::cache::evictor::{EvictionPolicy, Evictor};
use crate::cache::memory::MemoryStore;
use crate::cache::metrics::TierStats;
use crate::cache::serializer::Serializer;
use crate::config::{EvictionConfig, WarmTierConfig};

pub struct WarmTier<T> {
    store: MemoryStore<T>,
    serializer: Arc<dyn Serializer<T>>,
    compressor: Compressor,
    compression_threshold: usize,
    min_compression_ratio: f64,
}

impl<T: Clone> WarmTier<T> {
    pub fn new(
        config: &WarmTierConfig,
        eviction: &EvictionConfig,
        serializer: Arc<dyn Serializer<T>>,
        compressor: Compressor,
    ) -> Self {
        let evictor = Evictor::new(EvictionPolicy::WeightedLru, Some(eviction.batch_fraction));
        Self {
            store: MemoryStore::new(Tier::L2, config.max_size, config.max_entries, evictor),
            serializer,
            compressor,
            compression_threshold: config.compression_threshold,
            min_compression_ratio: config.min_compression_ratio,
        }
    }

    pub fn get(&mut self, key: &str) -> Option<T> {
        let decoded = match &self.store.get(key)?.value {
            StoredValue::Plain(value) => return Some(value.clone()),
            StoredValue::Compressed(bytes) => self
                .compressor
                .decompress(bytes)
                .map_err(|e| e.to_string())
                .and_then(|raw| self.serializer.deserialize(&raw).map_err(|e| e.to_string())),
        };

        match decoded {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(tier = %Tier::L2, key, %error, "Corrupted entry, discarding");
                self.store.discard_corrupted(key);
                None
            }
        }
    }

    /// Store a value, compressing it when that pays off.
    pub fn set(&mut self, key: &str, value: T, ttl: Duration) -> bool {
        let raw = match self.serializer.serialize(&value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(tier = %Tier::L2, key, error = %e, "Failed to serialize value");
                return false;
            }
        };

        let compressed = match self.compressor.compress_if_worthwhile(
            &raw,
            self.compression_threshold,
            self.min_compression_ratio,
        ) {
            Ok(compressed) => compressed,
            Err(e) => {
                // Fall back to storing the plain value.
                warn!(tier = %Tier::L2, key, error = %e, "Compression failed");
                None
            }
        };

        let entry = match compressed {
            Some(bytes) => {
                debug!(
                    tier = %Tier::L2,
                    key,
                    original = raw.len(),
                    compressed = bytes.len(),
                    "Compressed entry"
                );
                let size = bytes.len();
                CacheEntry::new(key, StoredValue::Compressed(bytes), ttl, size)
            }
            None => CacheEntry::new(key, StoredValue::Plain(value), ttl, raw.len()),
        };

        self.store.insert(entry)
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.store.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.store.peek(key).is_some()
    }

    /// Whether the entry under `key` is held compressed.
    pub fn is_compressed(&self, key: &str) -> Option<bool> {
        self.store.peek(key).map(|e| e.is_compressed())
    }

    pub fn purge_expired(&mut self) -> (usize, usize) {
        self.store.purge_expired()
    }

    pub fn clear(&mut self) {
        self.store.clear();
    }

    pub fn stats(&self) -> TierStats {
        self.store.stats()
    }

    #[cfg(test)]
    pub(crate) fn corrupt(&mut self, key: &str) {
        let size = self.store.peek(key).map(|e| e.size_bytes).unwrap_or(0);
        self.store.remove(key);
        self.store.insert(CacheEntry::new(
            key,
            StoredValue::Compressed(vec![0xde, 0xad, 0xbe, 0xef]),
            Duration::from_secs(60),
            size,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::serializer::JsonSerializer;
    use crate::config::CompressionConfig;

    fn tier() -> WarmTier<String> {
        WarmTier::new(
            &WarmTierConfig::default(),
            &EvictionConfig::default(),
            Arc::new(JsonSerializer::new()),
            Compressor::new(CompressionConfig::default()),
        )
    }

    #[test]
    fn test_small_value_stored_plain() {
        let mut t = tier();
        let value = "a".repeat(5 * 1024);
        assert!(t.set("small", value.clone(), Duration::from_secs(60)));
        assert_eq!(t.is_compressed("small"), Some(false));
        assert_eq!(t.get("small"), Some(value));
    }

    #[test]
    fn test_large_value_stored_compressed() {
        let mut t = tier();
        let value = "z".repeat(50 * 1024);
        assert!(t.set("large", value.clone(), Duration::from_secs(60)));
        assert_eq!(t.is_compressed("large"), Some(true));
        assert!(t.stats().size < 50 * 1024 / 5);
        assert_eq!(t.get("large"), Some(value));
    }

    #[test]
    fn test_corrupted_entry_becomes_miss() {
        let mut t = tier();
        t.set("k", "x".repeat(20 * 1024), Duration::from_secs(60));
        t.corrupt("k");

        assert_eq!(t.get("k"), None);
        assert!(!t.contains("k"));
        let stats = t.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_evicts_lowest_weighted_score() {
        let config = WarmTierConfig {
            max_entries: 2,
            ..Default::default()
        };
        let mut t = WarmTier::new(
            &config,
            &EvictionConfig::default(),
            Arc::new(JsonSerializer::<String>::new()),
            Compressor::new(CompressionConfig::default()),
        );
        let ttl = Duration::from_secs(60);
        t.set("busy", "1".into(), ttl);
        t.set("idle", "2".into(), ttl);
        for _ in 0..5 {
            t.get("busy");
        }

        assert!(t.set("new", "3".into(), ttl));
        assert!(t.contains("busy"));
        assert!(!t.contains("idle"));
    }
}
