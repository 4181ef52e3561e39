//! Read-through disk cache for merged shape groups
//!
//! Only a missing artifact triggers a rebuild. Any other read or decode
//! failure is returned to the caller. A plain-path cache performs no
//! staleness check; a keyed cache rejects artifacts built from other
//! parameters. Single process, single caller: there is no locking.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::artifact::{decode_artifact, encode_artifact, CacheKey};
use crate::compression::CompressionConfig;
use crate::data::ShapeGroups;
use crate::error::{PrepError, Result};
use crate::metrics::standard;

/// Disk cache holding one artifact
#[derive(Debug, Clone)]
pub struct DiskCache {
    path: PathBuf,
    key: Option<CacheKey>,
    compression: CompressionConfig,
}

impl DiskCache {
    /// Cache at a fixed path, without a key check
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key: None,
            compression: CompressionConfig::default(),
        }
    }

    /// Cache in `dir` whose file name and header are derived from `key`
    pub fn keyed(dir: impl AsRef<Path>, key: CacheKey) -> Self {
        Self {
            path: dir.as_ref().join(key.file_name()),
            key: Some(key),
            compression: CompressionConfig::default(),
        }
    }

    /// Set payload compression
    pub fn with_compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }

    /// Artifact path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Expected key, if keyed
    pub fn key(&self) -> Option<&CacheKey> {
        self.key.as_ref()
    }

    /// Return the cached groups, or build, persist and return them
    pub async fn load_or_build<F, Fut>(&self, builder: F) -> Result<ShapeGroups>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ShapeGroups>>,
    {
        if let Some(groups) = self.load().await? {
            standard::CACHE_HITS.inc();
            return Ok(groups);
        }

        standard::CACHE_MISSES.inc();
        info!("No cache artifact at {:?}, building", self.path);

        let groups = builder().await?;
        self.store(&groups).await?;
        Ok(groups)
    }

    /// Read the artifact; `None` only when the file does not exist
    pub async fn load(&self) -> Result<Option<ShapeGroups>> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PrepError::CacheIo {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let path = self.path.clone();
        let (header, groups) = tokio::task::spawn_blocking(move || decode_artifact(&path, &data))
            .await
            .map_err(|e| PrepError::Internal {
                message: format!("cache decode task failed: {}", e),
            })??;

        if let Some(expected) = &self.key {
            if header.key.as_ref() != Some(expected) {
                return Err(PrepError::CacheKeyMismatch {
                    path: self.path.clone(),
                    expected: expected.to_string(),
                    found: header
                        .key
                        .as_ref()
                        .map(CacheKey::to_string)
                        .unwrap_or_else(|| "an unkeyed build".into()),
                });
            }
        }

        info!(
            "Loaded cache artifact {:?}: {} groups, {} samples, written {}",
            self.path, header.group_count, header.sample_count, header.created_at
        );
        Ok(Some(groups))
    }

    /// Write the artifact via a temporary file and rename
    ///
    /// The parent directory must already exist.
    pub async fn store(&self, groups: &ShapeGroups) -> Result<()> {
        let encoded = encode_artifact(groups, self.key.as_ref(), &self.compression)?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cache".into());
        let pending = self
            .path
            .with_file_name(format!(".{}.{}.pending", file_name, uuid::Uuid::new_v4()));

        let io_err = |source| PrepError::CacheIo {
            path: self.path.clone(),
            source,
        };

        if let Err(e) = tokio::fs::write(&pending, &encoded).await {
            return Err(io_err(e));
        }
        if let Err(e) = tokio::fs::rename(&pending, &self.path).await {
            if let Err(cleanup) = tokio::fs::remove_file(&pending).await {
                debug!("Failed to remove pending artifact {:?}: {}", pending, cleanup);
            }
            warn!("Failed to commit cache artifact {:?}: {}", self.path, e);
            return Err(io_err(e));
        }

        info!(
            "Wrote cache artifact {:?} ({} bytes, {} groups)",
            self.path,
            encoded.len(),
            groups.len()
        );
        Ok(())
    }
}
