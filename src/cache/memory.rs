//! Bounded in-memory entry map shared by the hot and warm tiers.
//!
//! Owns the running byte total and enforces both ceilings (entry count and bytes)
//! before an insert completes. Expired entries are discovered lazily on read or
//! reclaimed first when the map is under pressure.

use std::collections::HashMap;
use std::time::Instant;

use tracing::debug;

use crate::cache::entry::{CacheEntry, Tier};
use crate::cache::evictor::{CandidateInfo, Evictor};
use crate::cache::metrics::TierStats;

pub struct MemoryStore<T> {
    tier: Tier,
    entries: HashMap<String, CacheEntry<T>>,
    size_bytes: usize,
    max_size: usize,
    max_entries: usize,
    evictor: Evictor,
    stats: TierStats,
}

impl<T> MemoryStore<T> {
    pub fn new(tier: Tier, max_size: usize, max_entries: usize, evictor: Evictor) -> Self {
        Self {
            tier,
            entries: HashMap::new(),
            size_bytes: 0,
            max_size,
            max_entries,
            evictor,
            stats: TierStats::default(),
        }
    }

    /// Look up a live entry, counting a hit or a miss. Expired entries are removed.
    pub fn get(&mut self, key: &str) -> Option<&mut CacheEntry<T>> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.is_expired_at(Instant::now()),
            None => {
                self.stats.misses += 1;
                return None;
            }
        };

        if expired {
            self.remove_entry(key);
            self.stats.expirations += 1;
            self.stats.misses += 1;
            debug!(tier = %self.tier, key, "Entry expired");
            return None;
        }

        self.stats.hits += 1;
        let entry = self.entries.get_mut(key)?;
        entry.touch();
        Some(entry)
    }

    /// Drop an entry that was just returned by `get` but could not be decoded,
    /// turning the recorded hit into a miss.
    pub fn discard_corrupted(&mut self, key: &str) {
        if self.remove_entry(key).is_some() {
            self.stats.hits = self.stats.hits.saturating_sub(1);
            self.stats.misses += 1;
        }
    }

    /// Insert an entry, evicting others if a ceiling would be exceeded.
    ///
    /// Returns `false` when the entry cannot fit. An existing entry under the same
    /// key is released first and stays released even if the insert is rejected.
    pub fn insert(&mut self, entry: CacheEntry<T>) -> bool {
        let size = entry.size_bytes;
        self.remove_entry(&entry.key);

        if size > self.max_size {
            debug!(tier = %self.tier, key = %entry.key, size, max = self.max_size, "Entry larger than tier");
            return false;
        }

        if !self.fits(size) {
            self.purge_expired();
        }
        if !self.fits(size) {
            let needed_slots = (self.entries.len() + 1).saturating_sub(self.max_entries);
            let needed_bytes = (self.size_bytes + size).saturating_sub(self.max_size);
            self.evict(needed_bytes, needed_slots);
        }
        if !self.fits(size) {
            debug!(tier = %self.tier, key = %entry.key, size, "Eviction could not free enough space");
            return false;
        }

        self.size_bytes += size;
        self.entries.insert(entry.key.clone(), entry);
        true
    }

    fn fits(&self, size: usize) -> bool {
        self.entries.len() < self.max_entries && self.size_bytes + size <= self.max_size
    }

    fn evict(&mut self, needed_bytes: usize, needed_slots: usize) {
        let now = Instant::now();
        let victims = self.evictor.select_victims(
            self.entries.values().map(|e| CandidateInfo {
                key: &e.key,
                hit_count: e.hit_count,
                age: e.age_at(now),
                size_bytes: e.size_bytes,
            }),
            needed_bytes,
            needed_slots,
        );

        for victim in victims {
            if self.remove_entry(&victim.key).is_some() {
                self.stats.evictions += 1;
                debug!(
                    tier = %self.tier,
                    key = %victim.key,
                    size = victim.size_bytes,
                    score = victim.score,
                    "Evicted entry"
                );
            }
        }
    }

    /// Remove an entry without touching hit/miss counters.
    pub fn remove(&mut self, key: &str) -> bool {
        self.remove_entry(key).is_some()
    }

    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry<T>> {
        let entry = self.entries.remove(key)?;
        self.size_bytes = self.size_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    /// Remove every expired entry. Returns `(removed, bytes_freed)`.
    pub fn purge_expired(&mut self) -> (usize, usize) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.is_expired_at(now))
            .map(|e| e.key.clone())
            .collect();

        let mut freed = 0;
        for key in &expired {
            if let Some(entry) = self.remove_entry(key) {
                freed += entry.size_bytes;
            }
        }
        self.stats.expirations += expired.len() as u64;
        (expired.len(), freed)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.size_bytes = 0;
    }

    /// Non-counting presence check.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry<T>> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn stats(&self) -> TierStats {
        TierStats {
            entries: self.entries.len(),
            size: self.size_bytes,
            ..self.stats
        }
    }
}
