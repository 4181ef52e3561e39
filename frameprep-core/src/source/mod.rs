//! Per-shot frame sources
//!
//! Fetching is two-phase: `select_nearest` locates the sample closest to a
//! timestamp and returns a handle, `materialize` loads that one frame into
//! memory. Missing shots, groups or samples are reported as
//! `FetchOutcome::NotFound`, never as errors. So is a shot the store could
//! not serve (`NotFoundReason::Unavailable`); malformed data stays an error.

pub mod zarr;

use std::fmt;
use std::future::Future;

use ndarray::ArrayD;

use crate::data::{Attrs, ShotId};
use crate::error::Result;

pub use zarr::{ZarrFrameSource, ZarrHandle, ZarrSourceConfig};

/// Why a shot produced no frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundReason {
    /// The shot is not in the store
    NoSuchShot,
    /// The shot has no data for the requested group
    NoSuchGroup,
    /// The group has no usable sample near the requested time
    NoMatchingSample,
    /// The store failed while the shot was being read
    Unavailable,
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundReason::NoSuchShot => write!(f, "no such shot"),
            NotFoundReason::NoSuchGroup => write!(f, "no such group"),
            NotFoundReason::NoMatchingSample => write!(f, "no matching sample"),
            NotFoundReason::Unavailable => write!(f, "store unavailable"),
        }
    }
}

/// Result of one fetch phase
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    Found(T),
    NotFound(NotFoundReason),
}

impl<T> FetchOutcome<T> {
    /// The found value, if any
    pub fn found(self) -> Option<T> {
        match self {
            FetchOutcome::Found(value) => Some(value),
            FetchOutcome::NotFound(_) => None,
        }
    }
}

/// A frame loaded into memory, spatial axes only
#[derive(Debug, Clone, PartialEq)]
pub struct LocalFrame {
    /// Timestamp of the selected sample
    pub time: f64,
    /// Data variable name in the source
    pub variable: String,
    /// Spatial axis names
    pub dims: Vec<String>,
    /// Frame values
    pub data: ArrayD<f32>,
    /// Source attributes
    pub attrs: Attrs,
}

/// Remote per-shot frame access
pub trait FrameSource: Send + Sync + 'static {
    /// Selected-but-not-loaded frame
    type Handle: Send + 'static;

    /// Locate the sample of `group` at `level` whose time is nearest `time`
    fn select_nearest(
        &self,
        shot_id: ShotId,
        group: &str,
        level: u32,
        time: f64,
    ) -> impl Future<Output = Result<FetchOutcome<Self::Handle>>> + Send;

    /// Load the selected frame into memory
    fn materialize(
        &self,
        handle: Self::Handle,
    ) -> impl Future<Output = Result<FetchOutcome<LocalFrame>>> + Send;
}

/// Index of the finite value nearest `target`; ties go to the lowest index
pub fn nearest_index(values: &[f64], target: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        if !v.is_finite() {
            continue;
        }
        let distance = (v - target).abs();
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((i, distance));
        }
    }
    best.map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_index() {
        let times = [0.0, 0.1, 0.2, 0.3];
        assert_eq!(nearest_index(&times, 0.12), Some(1));
        assert_eq!(nearest_index(&times, -5.0), Some(0));
        assert_eq!(nearest_index(&times, 9.0), Some(3));
        // equidistant: lowest index wins
        assert_eq!(nearest_index(&[1.0, 3.0], 2.0), Some(0));
        assert_eq!(nearest_index(&[f64::NAN, 5.0], 0.0), Some(1));
        assert_eq!(nearest_index(&[], 0.0), None);
        assert_eq!(nearest_index(&[f64::NAN], 0.0), None);
    }
}
