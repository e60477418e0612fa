//! L3: disk-backed cold tier.
//!
//! Values are serialized, zstd-compressed, and written one file per key. An
//! in-memory index mirrors `index.json`, which is rewritten after every mutation
//! so the tier survives restarts. Files are always written before their index
//! entry is committed; an index entry whose file cannot be read is treated as
//! corrupted and dropped.
//!
//! Eviction is strict oldest-first: hit counts are not persisted, so creation
//! time is the only reliable signal across restarts.
//!
//! Entry file names are derived from the key. An index entry naming any other
//! file is dropped at open, so a foreign or hand-edited index can never point
//! the tier outside its directory.
//!
//! Operations are not cancellation-safe: a `set` dropped after its index entry
//! was inserted leaves the entry resident. Callers that bound L3 calls with a
//! timeout delete the key after a timed-out write.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::compressor::{CompressionError, Compressor};
use crate::cache::entry::Tier;
use crate::cache::evictor::{CandidateInfo, EvictionPolicy, Evictor};
use crate::cache::metrics::TierStats;
use crate::cache::serializer::{Serializer, SerializerError};
use crate::config::DiskTierConfig;
use crate::transfer::disk_io::{DiskIoError, DiskIoStats, DiskStore, IndexEntry};

/// Why a value could not be encoded for, or decoded from, disk.
#[derive(Error, Debug)]
enum EntryError {
    #[error(transparent)]
    Disk(#[from] DiskIoError),

    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error(transparent)]
    Serializer(#[from] SerializerError),
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub struct ColdTier<T> {
    disk: DiskStore,
    index: HashMap<String, IndexEntry>,
    size_bytes: usize,
    max_size: usize,
    max_entries: usize,
    evictor: Evictor,
    serializer: Arc<dyn Serializer<T>>,
    compressor: Compressor,
    stats: TierStats,
}

impl<T> ColdTier<T> {
    /// Open the tier: create the directory, load the index, drop expired entries
    /// and files the index does not reference.
    ///
    /// A malformed index is logged and replaced by an empty one.
    pub async fn open(
        config: &DiskTierConfig,
        serializer: Arc<dyn Serializer<T>>,
        compressor: Compressor,
    ) -> Result<Self, DiskIoError> {
        let disk = DiskStore::new(config.cache_dir.clone()).await?;

        let loaded = match disk.load_index().await {
            Ok(entries) => entries,
            Err(DiskIoError::MalformedIndex(e)) => {
                warn!(path = %disk.index_path().display(), error = %e, "Discarding malformed index");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let mut foreign = 0;
        let index: HashMap<String, IndexEntry> = loaded
            .into_iter()
            .filter(|(key, entry)| {
                let owned = entry.file == DiskStore::file_name_for(key);
                if !owned {
                    warn!(key = %key, file = %entry.file, "Ignoring index entry with a foreign file name");
                    foreign += 1;
                }
                owned
            })
            .collect();
        let size_bytes = index.values().map(|e| e.size_bytes).sum();

        let mut tier = Self {
            disk,
            index,
            size_bytes,
            max_size: config.max_size,
            max_entries: config.max_entries,
            evictor: Evictor::new(EvictionPolicy::Oldest, None),
            serializer,
            compressor,
            stats: TierStats::default(),
        };

        let (expired, _) = tier.sweep_expired_entries().await;
        let orphans = tier.remove_orphan_files().await;
        let evicted = tier.make_room(0).await;
        if foreign + expired + evicted > 0 {
            tier.persist().await;
        }

        info!(
            dir = %tier.disk.cache_dir().display(),
            entries = tier.index.len(),
            size = tier.size_bytes,
            expired,
            foreign,
            orphans,
            evicted,
            "Cold tier opened"
        );

        Ok(tier)
    }

    pub async fn get(&mut self, key: &str) -> Option<T> {
        let Some(entry) = self.index.get(key).cloned() else {
            self.stats.misses += 1;
            return None;
        };

        if entry.is_expired_at(now_ms()) {
            self.remove_entry(key).await;
            self.persist().await;
            self.stats.expirations += 1;
            self.stats.misses += 1;
            debug!(tier = %Tier::L3, key, "Entry expired");
            return None;
        }

        match self.read_value(&entry.file).await {
            Ok(value) => {
                self.stats.hits += 1;
                Some(value)
            }
            Err(error) => {
                warn!(tier = %Tier::L3, key, %error, "Corrupted entry, discarding");
                self.remove_entry(key).await;
                self.persist().await;
                self.stats.misses += 1;
                None
            }
        }
    }

    async fn read_value(&mut self, file: &str) -> Result<T, EntryError> {
        let compressed = self.disk.read_file(file).await?;
        let raw = self.compressor.decompress(&compressed)?;
        Ok(self.serializer.deserialize(&raw)?)
    }

    fn encode(&self, value: &T) -> Result<Vec<u8>, EntryError> {
        let raw = self.serializer.serialize(value)?;
        Ok(self.compressor.compress(&raw)?)
    }

    /// Serialize, compress, and write a value, evicting the oldest entries if the
    /// byte or entry budget would be exceeded.
    pub async fn set(&mut self, key: &str, value: &T, ttl: Duration) -> bool {
        // The previous value is gone even if the new one is rejected below.
        let mut changed = self.remove_entry(key).await.is_some();

        let compressed = match self.encode(value) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(tier = %Tier::L3, key, %error, "Failed to encode value");
                if changed {
                    self.persist().await;
                }
                return false;
            }
        };

        let size = compressed.len();
        if size > self.max_size {
            debug!(tier = %Tier::L3, key, size, max = self.max_size, "Entry larger than tier");
            if changed {
                self.persist().await;
            }
            return false;
        }

        if !self.fits(size) {
            let (expired, _) = self.sweep_expired_entries().await;
            changed |= expired > 0;
        }
        if !self.fits(size) {
            changed |= self.make_room(size).await > 0;
        }
        if !self.fits(size) {
            if changed {
                self.persist().await;
            }
            debug!(tier = %Tier::L3, key, size, "Eviction could not free enough space");
            return false;
        }

        let file = DiskStore::file_name_for(key);
        if let Err(e) = self.disk.write_file(&file, &compressed).await {
            warn!(tier = %Tier::L3, key, error = %e, "Failed to write entry file");
            if let Err(e) = self.disk.delete_file(&file).await {
                warn!(tier = %Tier::L3, key, error = %e, "Failed to remove partial entry file");
            }
            if changed {
                self.persist().await;
            }
            return false;
        }

        self.index.insert(
            key.to_string(),
            IndexEntry {
                file,
                created_at: now_ms(),
                ttl: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
                size_bytes: size,
            },
        );
        self.size_bytes += size;

        if !self.persist().await {
            // Without a durable index entry the file would be orphaned on restart.
            self.remove_entry(key).await;
            return false;
        }

        true
    }

    /// Remove a key's file and index entry. Returns whether the key was present.
    pub async fn delete(&mut self, key: &str) -> bool {
        if self.remove_entry(key).await.is_some() {
            self.persist().await;
            true
        } else {
            false
        }
    }

    /// Remove every expired entry and persist the index. Returns `(removed, bytes_freed)`.
    pub async fn sweep_expired(&mut self) -> (usize, usize) {
        let swept = self.sweep_expired_entries().await;
        if swept.0 > 0 {
            self.persist().await;
        }
        swept
    }

    async fn sweep_expired_entries(&mut self) -> (usize, usize) {
        let now = now_ms();
        let expired: Vec<String> = self
            .index
            .iter()
            .filter(|(_, e)| e.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .collect();

        let mut freed = 0;
        for key in &expired {
            if let Some(entry) = self.remove_entry(key).await {
                freed += entry.size_bytes;
            }
        }
        self.stats.expirations += expired.len() as u64;
        if !expired.is_empty() {
            debug!(tier = %Tier::L3, removed = expired.len(), freed, "Swept expired entries");
        }
        (expired.len(), freed)
    }

    fn fits(&self, size: usize) -> bool {
        self.index.len() < self.max_entries && self.size_bytes + size <= self.max_size
    }

    /// Evict oldest entries until `incoming` more bytes and one more entry fit.
    /// With `incoming == 0`, only brings the tier back within its budgets.
    async fn make_room(&mut self, incoming: usize) -> usize {
        let slots_after = self.index.len() + usize::from(incoming > 0);
        let needed_slots = slots_after.saturating_sub(self.max_entries);
        let needed_bytes = (self.size_bytes + incoming).saturating_sub(self.max_size);
        if needed_slots == 0 && needed_bytes == 0 {
            return 0;
        }

        let now = now_ms();
        let victims = self.evictor.select_victims(
            self.index.iter().map(|(key, e)| CandidateInfo {
                key,
                hit_count: 0,
                age: Duration::from_millis(e.age_ms_at(now)),
                size_bytes: e.size_bytes,
            }),
            needed_bytes,
            needed_slots,
        );

        let mut evicted = 0;
        for victim in victims {
            if self.remove_entry(&victim.key).await.is_some() {
                evicted += 1;
                self.stats.evictions += 1;
                debug!(tier = %Tier::L3, key = %victim.key, size = victim.size_bytes, "Evicted entry");
            }
        }
        evicted
    }

    async fn remove_entry(&mut self, key: &str) -> Option<IndexEntry> {
        let entry = self.index.remove(key)?;
        self.size_bytes = self.size_bytes.saturating_sub(entry.size_bytes);
        if let Err(e) = self.disk.delete_file(&entry.file).await {
            warn!(tier = %Tier::L3, key, error = %e, "Failed to delete entry file");
        }
        Some(entry)
    }

    async fn remove_orphan_files(&mut self) -> usize {
        let referenced: HashSet<&str> = self.index.values().map(|e| e.file.as_str()).collect();
        let files = match self.disk.list_entry_files().await {
            Ok(files) => files,
            Err(e) => {
                warn!(tier = %Tier::L3, error = %e, "Failed to scan cache directory");
                return 0;
            }
        };

        let orphans: Vec<String> = files
            .into_iter()
            .filter(|f| !referenced.contains(f.as_str()))
            .collect();
        for file in &orphans {
            if let Err(e) = self.disk.delete_file(file).await {
                warn!(tier = %Tier::L3, file = %file, error = %e, "Failed to delete orphan file");
            }
        }
        orphans.len()
    }

    /// Write the index sidecar, logging failures. Returns whether it succeeded.
    async fn persist(&mut self) -> bool {
        match self.disk.persist_index(self.index.iter()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(tier = %Tier::L3, error = %e, "Failed to persist index");
                false
            }
        }
    }

    /// Persist the index, surfacing failures to the caller.
    pub async fn flush(&mut self) -> Result<(), DiskIoError> {
        self.disk.persist_index(self.index.iter()).await
    }

    /// Remove every entry and its file.
    pub async fn clear(&mut self) {
        let keys: Vec<String> = self.index.keys().cloned().collect();
        for key in &keys {
            self.remove_entry(key).await;
        }
        self.persist().await;
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn index_entry(&self, key: &str) -> Option<&IndexEntry> {
        self.index.get(key)
    }

    pub fn disk(&self) -> &DiskStore {
        &self.disk
    }

    pub fn disk_stats(&self) -> DiskIoStats {
        self.disk.stats()
    }

    pub fn stats(&self) -> TierStats {
        TierStats {
            entries: self.index.len(),
            size: self.size_bytes,
            ..self.stats
        }
    }
}
