//! Shape-grouped merging
//!
//! Stacks the frames of each shape group along a new leading shot axis,
//! turning per-frame `volume` and `time` scalars into per-sample coordinates.

use std::collections::{BTreeMap, HashSet};

use ndarray::{ArrayViewD, Axis};
use tracing::debug;

use crate::data::{
    Attrs, ExtractedFrame, MergedDataset, ShapeGroups, ShapeKey, FRAME_VARIABLE, SHOT_AXIS,
    TIME_COORD, VOLUME_COORD,
};
use crate::error::{PrepError, Result};
use crate::extract::FrameGroups;

/// Configuration for merging
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Name given to the frame variable
    pub variable: String,
    /// Store-internal attributes removed from merged datasets
    pub provenance_attrs: Vec<String>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            variable: FRAME_VARIABLE.into(),
            provenance_attrs: vec!["CLASS".into(), "uda_name".into()],
        }
    }
}

/// Merges frame groups into one dataset per shape
#[derive(Debug, Clone, Default)]
pub struct ShapeGroupedMerger {
    config: MergeConfig,
}

impl ShapeGroupedMerger {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    /// Merge every group
    pub fn merge(&self, grouped: FrameGroups) -> Result<ShapeGroups> {
        grouped
            .into_iter()
            .map(|(shape, frames)| Ok((shape, self.merge_group(shape, frames)?)))
            .collect()
    }

    /// Merge the frames of one shape
    pub fn merge_group(&self, shape: ShapeKey, frames: Vec<ExtractedFrame>) -> Result<MergedDataset> {
        let inconsistent = |reason: String| PrepError::InconsistentGroup { shape, reason };

        let Some(first) = frames.first() else {
            return Err(inconsistent("group has no frames".into()));
        };

        let mut seen = HashSet::with_capacity(frames.len());
        for frame in &frames {
            if frame.shape_key()? != shape {
                return Err(inconsistent(format!(
                    "shot {} has shape {:?}",
                    frame.shot_id,
                    frame.data.shape()
                )));
            }
            if frame.dims != first.dims {
                return Err(inconsistent(format!(
                    "shot {} has axes {:?}, expected {:?}",
                    frame.shot_id, frame.dims, first.dims
                )));
            }
            if !seen.insert(frame.shot_id) {
                return Err(PrepError::DuplicateShot {
                    shot_id: frame.shot_id,
                    shape,
                });
            }
        }

        let views: Vec<ArrayViewD<'_, f32>> = frames.iter().map(|f| f.data.view()).collect();
        let stacked = ndarray::stack(Axis(0), &views).map_err(|e| inconsistent(e.to_string()))?;

        let mut coords = BTreeMap::new();
        coords.insert(
            VOLUME_COORD.to_string(),
            frames.iter().map(|f| f.volume).collect(),
        );
        coords.insert(
            TIME_COORD.to_string(),
            frames.iter().map(|f| f.time).collect(),
        );

        let mut attrs = combine_attrs_drop_conflicts(frames.iter().map(|f| &f.attrs));
        for name in &self.config.provenance_attrs {
            attrs.remove(name);
        }

        let mut dims = vec![SHOT_AXIS.to_string()];
        dims.extend(first.dims.iter().cloned());

        debug!(
            "Merged {} frames of shape {} ({} -> {})",
            frames.len(),
            shape,
            first.variable,
            self.config.variable
        );

        Ok(MergedDataset {
            shape,
            variable: self.config.variable.clone(),
            dims,
            shot_ids: frames.iter().map(|f| f.shot_id).collect(),
            frames: stacked,
            coords,
            attrs,
        })
    }
}

/// Union of attribute maps, dropping every key whose values disagree
pub fn combine_attrs_drop_conflicts<'a>(maps: impl IntoIterator<Item = &'a Attrs>) -> Attrs {
    let mut combined = Attrs::new();
    let mut conflicted = HashSet::new();

    for attrs in maps {
        for (name, value) in attrs {
            if conflicted.contains(name) {
                continue;
            }
            match combined.get(name) {
                Some(existing) if existing != value => {
                    combined.remove(name);
                    conflicted.insert(name.clone());
                }
                Some(_) => {}
                None => {
                    combined.insert(name.clone(), value.clone());
                }
            }
        }
    }

    if !conflicted.is_empty() {
        debug!("Dropped conflicting attributes: {:?}", conflicted);
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::AttrValue;

    #[test]
    fn test_drop_conflicts_keeps_union() {
        let mut a = Attrs::new();
        a.insert("camera".into(), AttrValue::Text("rbb".into()));
        a.insert("exposure".into(), AttrValue::Integer(10));
        let mut b = Attrs::new();
        b.insert("camera".into(), AttrValue::Text("rbb".into()));
        b.insert("exposure".into(), AttrValue::Integer(12));
        b.insert("units".into(), AttrValue::Text("counts".into()));
        let mut c = Attrs::new();
        c.insert("exposure".into(), AttrValue::Integer(10));

        let combined = combine_attrs_drop_conflicts([&a, &b, &c]);
        assert_eq!(combined.len(), 2);
        assert!(combined.contains_key("camera"));
        assert!(combined.contains_key("units"));
        assert!(!combined.contains_key("exposure"));
    }
}
