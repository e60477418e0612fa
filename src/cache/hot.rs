//! L1: hot in-memory tier.
//!
//! Plain values only, no I/O. Sizes are estimated from the serialized form and
//! eviction favors keeping popular entries (fewest hits go first, oldest on ties).

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::cache::entry::{CacheEntry, StoredValue, Tier};
use crate::cache::evictor::{EvictionPolicy, Evictor};
use crate::cache::memory::MemoryStore;
use crate::cache::metrics::TierStats;
use crate::cache::serializer::Serializer;
use crate::config::{EvictionConfig, MemoryTierConfig};

pub struct HotTier<T> {
    store: MemoryStore<T>,
    serializer: Arc<dyn Serializer<T>>,
}

impl<T: Clone> HotTier<T> {
    pub fn new(
        config: &MemoryTierConfig,
        eviction: &EvictionConfig,
        serializer: Arc<dyn Serializer<T>>,
    ) -> Self {
        let evictor = Evictor::new(EvictionPolicy::Popularity, Some(eviction.batch_fraction));
        Self {
            store: MemoryStore::new(Tier::L1, config.max_size, config.max_entries, evictor),
            serializer,
        }
    }

    pub fn get(&mut self, key: &str) -> Option<T> {
        match &self.store.get(key)?.value {
            StoredValue::Plain(value) => Some(value.clone()),
            // L1 never stores compressed values.
            StoredValue::Compressed(_) => None,
        }
    }

    /// Store a value. Returns `false` if it cannot be sized or does not fit.
    pub fn set(&mut self, key: &str, value: T, ttl: Duration) -> bool {
        let size = match self.serializer.serialize(&value) {
            Ok(bytes) => bytes.len(),
            Err(e) => {
                warn!(tier = %Tier::L1, key, error = %e, "Failed to size value");
                return false;
            }
        };
        self.store
            .insert(CacheEntry::new(key, StoredValue::Plain(value), ttl, size))
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.store.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.store.peek(key).is_some()
    }

    pub fn purge_expired(&mut self) -> (usize, usize) {
        self.store.purge_expired()
    }

    pub fn clear(&mut self) {
        self.store.clear();
    }

    pub fn hit_count(&self, key: &str) -> Option<u64> {
        self.store.peek(key).map(|e| e.hit_count)
    }

    pub fn stats(&self) -> TierStats {
        self.store.stats()
    }
}
