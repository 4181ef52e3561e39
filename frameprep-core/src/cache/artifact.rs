//! Cache artifact encoding
//!
//! Layout: 8 magic bytes, a little-endian `u32` header length, the bincode
//! header, then the bincode payload (zstd-compressed when the header says so).
//! The header is the artifact's commit record: payload length and CRC32C
//! must match it or the artifact is corrupt.

use std::fmt;
use std::path::Path;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::compression::{self, CompressionAlgorithm, CompressionConfig};
use crate::data::ShapeGroups;
use crate::error::{PrepError, Result};

/// Leading bytes of every artifact
pub const ARTIFACT_MAGIC: [u8; 8] = *b"FPCACHE\0";

/// Parameters the cached content was built from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub campaign: String,
    pub group: String,
    pub level: u32,
    pub variable: String,
}

impl CacheKey {
    pub fn new(
        campaign: impl Into<String>,
        group: impl Into<String>,
        level: u32,
        variable: impl Into<String>,
    ) -> Self {
        Self {
            campaign: campaign.into(),
            group: group.into(),
            level,
            variable: variable.into(),
        }
    }

    /// CRC32C of the canonical key string
    pub fn fingerprint(&self) -> u32 {
        crc32c::crc32c(self.to_string().as_bytes())
    }

    /// Artifact file name derived from the key
    pub fn file_name(&self) -> String {
        let safe = |s: &str| -> String {
            s.chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
                .collect()
        };
        format!(
            "frames-{}-{}-l{}-{:08x}.bin",
            safe(&self.campaign),
            safe(&self.group),
            self.level,
            self.fingerprint()
        )
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "campaign={} group={} level={} variable={}",
            self.campaign, self.group, self.level, self.variable
        )
    }
}

/// Artifact header
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    /// Format version
    pub version: u32,
    /// Time the artifact was written
    pub created_at: DateTime<Utc>,
    /// Build parameters, when the cache is keyed
    pub key: Option<CacheKey>,
    /// Number of shape groups
    pub group_count: u32,
    /// Total samples across groups
    pub sample_count: u64,
    /// Payload size in bytes as stored
    pub payload_len: u64,
    /// CRC32C of the stored payload
    pub payload_crc32c: u32,
    /// Whether the payload is zstd-compressed
    pub compressed: bool,
}

impl ArtifactHeader {
    /// Current artifact version
    pub const CURRENT_VERSION: u32 = 1;
}

/// Serialize groups into an artifact
pub fn encode_artifact(
    groups: &ShapeGroups,
    key: Option<&CacheKey>,
    compression: &CompressionConfig,
) -> Result<Bytes> {
    let raw = bincode::serialize(groups).map_err(|e| PrepError::Internal {
        message: format!("Failed to serialize shape groups: {}", e),
    })?;

    let compressed = compression.algorithm == CompressionAlgorithm::Zstd
        && raw.len() >= compression.min_size;
    let payload = if compressed {
        compression::compress_zstd(&raw, compression.level.value())?
    } else {
        Bytes::from(raw)
    };

    let header = ArtifactHeader {
        version: ArtifactHeader::CURRENT_VERSION,
        created_at: Utc::now(),
        key: key.cloned(),
        group_count: groups.len() as u32,
        sample_count: groups.values().map(|g| g.len() as u64).sum(),
        payload_len: payload.len() as u64,
        payload_crc32c: crc32c::crc32c(&payload),
        compressed,
    };
    let header_bytes = bincode::serialize(&header).map_err(|e| PrepError::Internal {
        message: format!("Failed to serialize artifact header: {}", e),
    })?;

    let mut out = BytesMut::with_capacity(ARTIFACT_MAGIC.len() + 4 + header_bytes.len() + payload.len());
    out.put_slice(&ARTIFACT_MAGIC);
    out.put_u32_le(header_bytes.len() as u32);
    out.put_slice(&header_bytes);
    out.put_slice(&payload);
    Ok(out.freeze())
}

/// Parse and verify an artifact read from `path`
pub fn decode_artifact(path: &Path, data: &[u8]) -> Result<(ArtifactHeader, ShapeGroups)> {
    let corrupt = |reason: String| PrepError::CacheCorrupt {
        path: path.to_path_buf(),
        reason,
    };

    let prefix = ARTIFACT_MAGIC.len() + 4;
    if data.len() < prefix || data[..ARTIFACT_MAGIC.len()] != ARTIFACT_MAGIC {
        return Err(corrupt("missing artifact magic".into()));
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&data[ARTIFACT_MAGIC.len()..prefix]);
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    if data.len() < prefix + header_len {
        return Err(corrupt(format!("truncated header ({} bytes declared)", header_len)));
    }

    let header: ArtifactHeader = bincode::deserialize(&data[prefix..prefix + header_len])
        .map_err(|e| corrupt(format!("bad header: {}", e)))?;

    if header.version > ArtifactHeader::CURRENT_VERSION {
        return Err(corrupt(format!(
            "artifact version {} is newer than supported {}",
            header.version,
            ArtifactHeader::CURRENT_VERSION
        )));
    }

    let payload = &data[prefix + header_len..];
    if payload.len() as u64 != header.payload_len {
        return Err(corrupt(format!(
            "payload is {} bytes, header says {}",
            payload.len(),
            header.payload_len
        )));
    }
    let actual = crc32c::crc32c(payload);
    if actual != header.payload_crc32c {
        return Err(corrupt(format!(
            "payload checksum {:08x}, header says {:08x}",
            actual, header.payload_crc32c
        )));
    }

    let raw = if header.compressed {
        compression::decompress_zstd(payload).map_err(|e| corrupt(e.to_string()))?
    } else {
        Bytes::copy_from_slice(payload)
    };

    let groups: ShapeGroups =
        bincode::deserialize(&raw).map_err(|e| corrupt(format!("bad payload: {}", e)))?;

    Ok((header, groups))
}
