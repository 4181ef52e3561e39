//! Object storage access
//!
//! `ObjectStore` is the read seam used by frame sources; `S3Client` talks to
//! an S3-compatible endpoint and `LocalStore` reads a mirrored directory.

pub mod local;
pub mod s3;
pub mod zarr;

use std::future::Future;

use bytes::Bytes;

use crate::error::{PrepError, Result};

pub use local::LocalStore;
pub use s3::{S3Client, S3Config};

/// Read-only key/value object storage
pub trait ObjectStore: Send + Sync + 'static {
    /// Fetch a whole object; a missing key is `PrepError::ObjectNotFound`
    fn get_object(&self, key: &str) -> impl Future<Output = Result<Bytes>> + Send;

    /// Fetch an object, mapping a missing key to `None`
    fn get_optional(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>>> + Send {
        async move {
            match self.get_object(key).await {
                Ok(data) => Ok(Some(data)),
                Err(PrepError::ObjectNotFound { .. }) => Ok(None),
                Err(e) => Err(e),
            }
        }
    }
}
