//! Compression support for cache artifacts and array chunks
//!
//! Zstd is the only codec; uncompressed data passes through untouched.

use bytes::Bytes;

use crate::error::{PrepError, Result};

/// Compression algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionAlgorithm {
    /// No compression
    None,
    /// Zstd
    #[default]
    Zstd,
}

/// Compression level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(i32);

impl CompressionLevel {
    /// Default compression
    pub const DEFAULT: Self = Self(3);

    pub fn value(&self) -> i32 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Compression configuration
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Algorithm to use
    pub algorithm: CompressionAlgorithm,
    /// Compression level
    pub level: CompressionLevel,
    /// Minimum size to compress (skip small data)
    pub min_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::Zstd,
            level: CompressionLevel::DEFAULT,
            min_size: 1024,
        }
    }
}

impl CompressionConfig {
    /// Configuration that never compresses
    pub fn disabled() -> Self {
        Self {
            algorithm: CompressionAlgorithm::None,
            ..Default::default()
        }
    }
}

pub(crate) fn compress_zstd(data: &[u8], level: i32) -> Result<Bytes> {
    zstd::encode_all(data, level)
        .map(Bytes::from)
        .map_err(|e| PrepError::Internal {
            message: format!("Zstd compression failed: {}", e),
        })
}

pub(crate) fn decompress_zstd(data: &[u8]) -> Result<Bytes> {
    zstd::decode_all(data)
        .map(Bytes::from)
        .map_err(|e| PrepError::Internal {
            message: format!("Invalid Zstd data: {}", e),
        })
}
