//! S3-compatible storage client
//!
//! Anonymous read access over plain HTTP GET, which is all the public shot
//! archive needs.

use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::ObjectStore;
use crate::error::{PrepError, Result};

/// Configuration for S3 client
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 endpoint URL
    pub endpoint: String,
    /// Bucket name
    pub bucket: String,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: "https://s3.echo.stfc.ac.uk".into(),
            bucket: "mast".into(),
            connect_timeout_secs: 10,
            request_timeout_secs: 300,
        }
    }
}

/// S3-compatible storage client using reqwest
pub struct S3Client {
    client: Client,
    config: S3Config,
}

impl S3Client {
    /// Create a new S3 client
    pub fn new(config: S3Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| PrepError::StorageError {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    /// Build URL for an object
    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.bucket,
            key.trim_start_matches('/')
        )
    }

    /// Get bucket name
    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }
}

impl ObjectStore for S3Client {
    async fn get_object(&self, key: &str) -> Result<Bytes> {
        let url = self.object_url(key);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PrepError::StorageError {
                message: format!("Get object failed for {}: {}", key, e),
            })?;

        // Anonymous buckets answer 403 for keys that do not exist
        if resp.status() == StatusCode::NOT_FOUND || resp.status() == StatusCode::FORBIDDEN {
            return Err(PrepError::ObjectNotFound { key: key.into() });
        }

        if !resp.status().is_success() {
            return Err(PrepError::StorageError {
                message: format!("Get object failed for {}: status {}", key, resp.status()),
            });
        }

        let data = resp.bytes().await.map_err(|e| PrepError::StorageError {
            message: format!("Failed to read body for {}: {}", key, e),
        })?;

        debug!("Fetched {} ({} bytes)", key, data.len());
        Ok(data)
    }
}
