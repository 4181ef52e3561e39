//! Frame and dataset data model
//!
//! Per-shot frames, shape keys and merged datasets.

pub mod dataset;
pub mod frame;

pub use dataset::{MergedDataset, ShapeGroups};
pub use frame::{AttrValue, Attrs, ExtractedFrame, ShapeKey, ShotId};

/// Leading axis of merged datasets
pub const SHOT_AXIS: &str = "shot_id";

/// Target coordinate
pub const VOLUME_COORD: &str = "volume";

/// Sample timestamp coordinate
pub const TIME_COORD: &str = "time";

/// Stable name of the frame variable after merging
pub const FRAME_VARIABLE: &str = "frame";
