//! frameprep core - per-shot frame acquisition and dataset preparation
//!
//! This crate provides:
//! - Nearest-in-time frame extraction from per-shot Zarr stores
//! - Shape-grouped merging into labeled datasets
//! - A read-through disk cache for the merged groups
//! - Reproducible train/test splits with a holdout solution table

pub mod cache;
pub mod catalog;
pub mod compression;
pub mod config;
pub mod data;
pub mod error;
pub mod extract;
pub mod merge;
pub mod metrics;
pub mod output;
pub mod pipeline;
pub mod source;
pub mod split;
pub mod storage;

pub use error::{PrepError, Result};
pub use pipeline::{Pipeline, PipelineReport};

/// Default split seed
pub const DEFAULT_SEED: u64 = 7;

/// Default share of samples held out for testing
pub const DEFAULT_TEST_FRACTION: f64 = 0.3;

/// Default number of shot fetches in flight
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 4;
