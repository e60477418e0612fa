//! Compression for the warm and disk tiers.
//!
//! Both tiers use zstd. The disk tier compresses unconditionally; the warm tier
//! only keeps the compressed form when the value is large and shrinks enough.

use crate::config::CompressionConfig;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Zstd compression failed: {0}")]
    Compress(#[source] std::io::Error),

    #[error("Zstd decompression failed: {0}")]
    Decompress(#[source] std::io::Error),
}

/// The compression engine.
#[derive(Debug, Clone)]
pub struct Compressor {
    config: CompressionConfig,
}

impl Compressor {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Compress data with zstd.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        zstd::encode_all(data, self.config.zstd_level).map_err(CompressionError::Compress)
    }

    /// Decompress zstd data.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        zstd::decode_all(data).map_err(CompressionError::Decompress)
    }

    /// Compress `data` only if it is larger than `threshold` bytes and the result is
    /// at least `min_reduction` (fraction of the original size) smaller.
    ///
    /// Returns `Ok(None)` when the value should be stored as-is.
    pub fn compress_if_worthwhile(
        &self,
        data: &[u8],
        threshold: usize,
        min_reduction: f64,
    ) -> Result<Option<Vec<u8>>, CompressionError> {
        if data.len() <= threshold {
            return Ok(None);
        }

        let compressed = self.compress(data)?;
        let limit = data.len() as f64 * (1.0 - min_reduction);
        if (compressed.len() as f64) <= limit {
            Ok(Some(compressed))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zstd_roundtrip() {
        let compressor = Compressor::new(CompressionConfig::default());
        let data = vec![42u8; 4096];

        let compressed = compressor.compress(&data).unwrap();
        assert!(compressed.len() < data.len()); // should compress well

        let decompressed = compressor.decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_small_values_are_left_alone() {
        let compressor = Compressor::new(CompressionConfig::default());
        let data = vec![b'a'; 5 * 1024];
        assert!(compressor
            .compress_if_worthwhile(&data, 10 * 1024, 0.2)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_incompressible_values_are_left_alone() {
        let compressor = Compressor::new(CompressionConfig::default());
        // xorshift noise does not shrink by 20%.
        let mut state = 0x2545_F491_4F6C_DD1Du64;
        let data: Vec<u8> = (0..32 * 1024)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                state as u8
            })
            .collect();
        assert!(compressor
            .compress_if_worthwhile(&data, 10 * 1024, 0.2)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_large_repetitive_values_are_compressed() {
        let compressor = Compressor::new(CompressionConfig::default());
        let data = vec![b'x'; 50 * 1024];
        let compressed = compressor
            .compress_if_worthwhile(&data, 10 * 1024, 0.2)
            .unwrap()
            .expect("repetitive data should compress");
        assert!(compressed.len() < data.len() / 5);
        assert_eq!(compressor.decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_garbage_fails_to_decompress() {
        let compressor = Compressor::new(CompressionConfig::default());
        assert!(compressor.decompress(b"definitely not zstd").is_err());
    }
}
