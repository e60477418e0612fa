//! Async disk I/O for the cold tier.
//!
//! Each cached value lives in its own file, named by the SHA-256 of its key so
//! arbitrary keys map to safe, collision-free file names. A single `index.json`
//! sidecar records the key → file mapping with timestamps and sizes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

/// Extension marking zstd-compressed entry files.
pub const ENTRY_EXTENSION: &str = "zst";

/// Name of the index sidecar inside the cache directory.
pub const INDEX_FILE: &str = "index.json";

#[derive(Error, Debug)]
pub enum DiskIoError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Entry file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Index file is malformed: {0}")]
    MalformedIndex(#[source] serde_json::Error),

    #[error("Failed to encode index: {0}")]
    IndexEncode(#[source] serde_json::Error),
}

/// Persisted metadata for one cold-tier entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    /// File name relative to the cache directory.
    pub file: String,

    /// Creation time in milliseconds since the Unix epoch.
    pub created_at: u64,

    /// Time to live in milliseconds.
    pub ttl: u64,

    /// Compressed size on disk.
    pub size_bytes: usize,
}

impl IndexEntry {
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at) > self.ttl
    }

    pub fn age_ms_at(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at)
    }
}

/// Cumulative file traffic of the cold tier since it was opened.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskIoStats {
    pub total_writes: u64,
    pub total_reads: u64,
    pub total_deletes: u64,
    pub total_bytes_written: u64,
    pub total_bytes_read: u64,
    pub index_flushes: u64,
}

/// Disk I/O engine for entry files and the index sidecar.
pub struct DiskStore {
    /// Directory holding entry files and the index.
    cache_dir: PathBuf,

    /// Transfer statistics.
    stats: DiskIoStats,
}

impl DiskStore {
    /// Open a store, creating the cache directory if needed.
    pub async fn new(cache_dir: PathBuf) -> Result<Self, DiskIoError> {
        fs::create_dir_all(&cache_dir).await?;

        Ok(Self {
            cache_dir,
            stats: DiskIoStats::default(),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Deterministic file name for a key: hex SHA-256 plus the compression extension.
    pub fn file_name_for(key: &str) -> String {
        let digest = Sha256::digest(key.as_bytes());
        format!("{}.{ENTRY_EXTENSION}", hex::encode(digest))
    }

    fn path_of(&self, file: &str) -> PathBuf {
        self.cache_dir.join(file)
    }

    pub fn index_path(&self) -> PathBuf {
        self.cache_dir.join(INDEX_FILE)
    }

    /// Write an entry file.
    pub async fn write_file(&mut self, file: &str, data: &[u8]) -> Result<PathBuf, DiskIoError> {
        let path = self.path_of(file);
        fs::write(&path, data).await?;

        debug!(path = %path.display(), size = data.len(), "Wrote entry file");

        self.stats.total_writes += 1;
        self.stats.total_bytes_written += data.len() as u64;

        Ok(path)
    }

    /// Read an entry file.
    pub async fn read_file(&mut self, file: &str) -> Result<Vec<u8>, DiskIoError> {
        let path = self.path_of(file);

        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DiskIoError::FileNotFound(path));
            }
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), size = data.len(), "Read entry file");

        self.stats.total_reads += 1;
        self.stats.total_bytes_read += data.len() as u64;

        Ok(data)
    }

    /// Delete an entry file. A file that is already gone is not an error.
    pub async fn delete_file(&mut self, file: &str) -> Result<(), DiskIoError> {
        let path = self.path_of(file);

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Deleted entry file");
                self.stats.total_deletes += 1;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Load the index sidecar. A missing index is an empty cache.
    pub async fn load_index(&self) -> Result<Vec<(String, IndexEntry)>, DiskIoError> {
        let path = self.index_path();
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let entries: Vec<(String, IndexEntry)> =
            serde_json::from_slice(&data).map_err(DiskIoError::MalformedIndex)?;
        debug!(path = %path.display(), entries = entries.len(), "Loaded index");
        Ok(entries)
    }

    /// Persist the index as a JSON array of `[key, entry]` pairs.
    ///
    /// Written to a temporary file and renamed into place so readers never see
    /// a partially written index.
    pub async fn persist_index<'a>(
        &mut self,
        entries: impl Iterator<Item = (&'a String, &'a IndexEntry)>,
    ) -> Result<(), DiskIoError> {
        let pairs: Vec<(&String, &IndexEntry)> = entries.collect();
        let data = serde_json::to_vec(&pairs).map_err(DiskIoError::IndexEncode)?;

        let path = self.index_path();
        let tmp = self.cache_dir.join(format!("{INDEX_FILE}.tmp"));
        fs::write(&tmp, &data).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            warn!(error = %e, "Failed to move index into place");
            if let Err(cleanup) = fs::remove_file(&tmp).await {
                warn!(path = %tmp.display(), error = %cleanup, "Failed to remove temporary index");
            }
            return Err(e.into());
        }

        self.stats.index_flushes += 1;
        Ok(())
    }

    pub fn stats(&self) -> DiskIoStats {
        self.stats
    }

    /// Names of all entry files currently in the cache directory.
    pub async fn list_entry_files(&self) -> Result<Vec<String>, DiskIoError> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.cache_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION) {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    files.push(name.to_string());
                }
            }
        }
        Ok(files)
    }
}
