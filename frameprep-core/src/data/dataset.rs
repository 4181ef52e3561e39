//! Merged, shape-homogeneous frame datasets
//!
//! One `MergedDataset` holds every frame of a single `ShapeKey`, stacked
//! along a leading shot axis, with per-sample coordinate columns.

use std::collections::BTreeMap;

use ndarray::{ArrayD, ArrayViewD, Axis};
use serde::{Deserialize, Serialize};

use super::frame::{Attrs, ShapeKey, ShotId};
use super::{SHOT_AXIS, VOLUME_COORD};

/// Mapping persisted by the disk cache
pub type ShapeGroups = BTreeMap<ShapeKey, MergedDataset>;

/// Concatenated frames of one shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedDataset {
    /// Shape shared by every frame
    pub shape: ShapeKey,
    /// Name of the frame variable
    pub variable: String,
    /// Axis names of `frames`, shot axis first
    pub dims: Vec<String>,
    /// Shot id per sample, in concatenation order
    pub shot_ids: Vec<ShotId>,
    /// Frame values, shape `[n, height, width(, channels)]`
    pub frames: ArrayD<f32>,
    /// Per-sample coordinates along the shot axis
    pub coords: BTreeMap<String, Vec<f64>>,
    /// Dataset attributes
    pub attrs: Attrs,
}

impl MergedDataset {
    /// Number of samples
    pub fn len(&self) -> usize {
        self.shot_ids.len()
    }

    /// True when the dataset has no samples
    pub fn is_empty(&self) -> bool {
        self.shot_ids.is_empty()
    }

    /// Name of the leading axis
    pub fn sample_axis(&self) -> &str {
        self.dims.first().map(String::as_str).unwrap_or(SHOT_AXIS)
    }

    /// Per-sample coordinate by name
    pub fn coord(&self, name: &str) -> Option<&[f64]> {
        self.coords.get(name).map(Vec::as_slice)
    }

    /// Target values, if the dataset still carries them
    pub fn target(&self) -> Option<&[f64]> {
        self.coord(VOLUME_COORD)
    }

    /// Frame at sample position `index`
    pub fn frame(&self, index: usize) -> ArrayViewD<'_, f32> {
        self.frames.index_axis(Axis(0), index)
    }

    /// Sample position of a shot
    pub fn position_of(&self, shot_id: ShotId) -> Option<usize> {
        self.shot_ids.iter().position(|&id| id == shot_id)
    }

    /// Remove a coordinate, returning its values
    pub fn drop_coord(&mut self, name: &str) -> Option<Vec<f64>> {
        self.coords.remove(name)
    }

    /// Copy of the samples at `indices`, in that order
    pub fn select(&self, indices: &[usize]) -> MergedDataset {
        let coords = self
            .coords
            .iter()
            .map(|(name, values)| {
                let picked = indices.iter().map(|&i| values[i]).collect();
                (name.clone(), picked)
            })
            .collect();

        MergedDataset {
            shape: self.shape,
            variable: self.variable.clone(),
            dims: self.dims.clone(),
            shot_ids: indices.iter().map(|&i| self.shot_ids[i]).collect(),
            frames: self.frames.select(Axis(0), indices),
            coords,
            attrs: self.attrs.clone(),
        }
    }
}
