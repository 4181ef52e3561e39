//! Filesystem-backed object store
//!
//! Serves keys as paths relative to a root directory. Used for local mirrors
//! of the shot archive and in tests.

use std::io::ErrorKind;
use std::path::PathBuf;

use bytes::Bytes;

use super::ObjectStore;
use crate::error::{PrepError, Result};

/// Object store rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a store serving keys below `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }
}

impl ObjectStore for LocalStore {
    async fn get_object(&self, key: &str) -> Result<Bytes> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(PrepError::ObjectNotFound { key: key.into() })
            }
            Err(e) => Err(PrepError::StorageError {
                message: format!("Failed to read {:?}: {}", path, e),
            }),
        }
    }
}
