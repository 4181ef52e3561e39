//! Error types for frameprep
//!
//! One taxonomy covering storage, catalog, frame data, cache, split
//! preconditions and output errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::data::{ShapeKey, ShotId};

/// Primary error type for all frameprep operations
#[derive(Debug, Error)]
pub enum PrepError {
    // ========== Storage Errors ==========

    /// Object store request failed
    #[error("Storage operation failed: {message}")]
    StorageError { message: String },

    /// Object not found in storage
    #[error("Object not found: {key}")]
    ObjectNotFound { key: String },

    // ========== Catalog Errors ==========

    /// Shot catalog query failed or returned unusable rows
    #[error("Catalog query failed: {message}")]
    CatalogError { message: String },

    // ========== Frame Data Errors ==========

    /// Frame or array metadata is malformed
    #[error("Malformed data for shot {shot_id}: {reason}")]
    MalformedFrame { shot_id: ShotId, reason: String },

    /// Array metadata could not be parsed
    #[error("Malformed array metadata at {key}: {reason}")]
    MalformedMetadata { key: String, reason: String },

    /// Chunk codec is not supported
    #[error("Unsupported codec {codec} for {key}")]
    UnsupportedCodec { key: String, codec: String },

    /// Array dtype is not supported
    #[error("Unsupported dtype {dtype} for {key}")]
    UnsupportedDtype { key: String, dtype: String },

    // ========== Cache Errors ==========

    /// Cache artifact exists but could not be read or written
    #[error("Cache I/O failed for {path:?}: {source}")]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Cache artifact exists but does not decode
    #[error("Corrupt cache artifact {path:?}: {reason}")]
    CacheCorrupt { path: PathBuf, reason: String },

    /// Cache artifact was built for different parameters
    #[error("Cache artifact {path:?} was built for {found}, expected {expected}")]
    CacheKeyMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    // ========== Precondition Errors ==========

    /// Dataset has no samples
    #[error("Dataset is empty")]
    EmptyDataset,

    /// Split fraction outside (0, 1)
    #[error("Test fraction must be in (0, 1), got {value}")]
    InvalidTestFraction { value: f64 },

    /// Dataset carries no target coordinate
    #[error("Dataset has no target coordinate {name}")]
    MissingTarget { name: String },

    /// Extraction produced no frames at all
    #[error("No shape groups found")]
    NoShapeGroups,

    /// Requested shape group is absent
    #[error("No shape group {shape}")]
    ShapeNotFound { shape: ShapeKey },

    /// A shot appears twice in one group
    #[error("Shot {shot_id} appears more than once in group {shape}")]
    DuplicateShot { shot_id: ShotId, shape: ShapeKey },

    /// Frames in one group disagree on layout
    #[error("Inconsistent frames in group {shape}: {reason}")]
    InconsistentGroup { shape: ShapeKey, reason: String },

    // ========== Output Errors ==========

    /// Writing split outputs failed
    #[error("Failed to write {path:?}: {reason}")]
    OutputError { path: PathBuf, reason: String },

    // ========== Runtime Errors ==========

    /// Configuration value could not be parsed
    #[error("Invalid configuration {name}: {reason}")]
    Configuration { name: String, reason: String },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PrepError {
    /// Returns true if this error indicates a damaged artifact or store object
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            PrepError::CacheCorrupt { .. }
                | PrepError::MalformedFrame { .. }
                | PrepError::MalformedMetadata { .. }
        )
    }

    /// Returns true if the store failed to answer, as opposed to answering with bad data
    pub fn is_transient(&self) -> bool {
        matches!(self, PrepError::StorageError { .. })
    }

    /// Returns true if this error is a violated precondition of a pipeline stage
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            PrepError::EmptyDataset
                | PrepError::InvalidTestFraction { .. }
                | PrepError::MissingTarget { .. }
                | PrepError::NoShapeGroups
                | PrepError::ShapeNotFound { .. }
                | PrepError::DuplicateShot { .. }
        )
    }

    pub(crate) fn output(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        PrepError::OutputError {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

/// Result type alias for frameprep operations
pub type Result<T> = std::result::Result<T, PrepError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(PrepError::EmptyDataset.is_precondition());
        assert!(PrepError::InvalidTestFraction { value: 1.5 }.is_precondition());
        assert!(!PrepError::EmptyDataset.is_corruption());

        let corrupt = PrepError::CacheCorrupt {
            path: PathBuf::from("/tmp/frames.bin"),
            reason: "bad magic".into(),
        };
        assert!(corrupt.is_corruption());
        assert!(!corrupt.is_precondition());
    }

    #[test]
    fn test_display() {
        let err = PrepError::ShapeNotFound {
            shape: ShapeKey::new(448, 640),
        };
        assert_eq!(err.to_string(), "No shape group (448, 640)");
    }
}
