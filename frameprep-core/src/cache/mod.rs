//! On-disk caching of merged shape groups
//!
//! The artifact format lives in `artifact`, the read-through cache in `disk`.

pub mod artifact;
pub mod disk;

pub use artifact::{ArtifactHeader, CacheKey};
pub use disk::DiskCache;
