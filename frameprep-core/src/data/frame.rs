//! Per-shot frame types
//!
//! A frame is one image-like sample taken from a shot's time series,
//! annotated with the shot id and the target scalar.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::error::{PrepError, Result};

/// Experiment (shot) identifier
pub type ShotId = u32;

/// Spatial signature of a frame: every axis except the leading time axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShapeKey {
    /// Rows
    pub height: usize,
    /// Columns
    pub width: usize,
    /// Trailing channel axis, if the frame has one
    pub channels: Option<usize>,
}

impl ShapeKey {
    /// Shape of a single-channel frame
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            channels: None,
        }
    }

    /// Shape of a frame with a trailing channel axis
    pub fn with_channels(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels: Some(channels),
        }
    }

    /// Derive the key from spatial dimensions (time axis already removed)
    pub fn from_dims(shot_id: ShotId, dims: &[usize]) -> Result<Self> {
        match *dims {
            [height, width] => Ok(Self::new(height, width)),
            [height, width, channels] => Ok(Self::with_channels(height, width, channels)),
            _ => Err(PrepError::MalformedFrame {
                shot_id,
                reason: format!("expected 2 or 3 spatial axes, got shape {:?}", dims),
            }),
        }
    }

    /// Dimensions in storage order
    pub fn dims(&self) -> Vec<usize> {
        let mut dims = vec![self.height, self.width];
        if let Some(channels) = self.channels {
            dims.push(channels);
        }
        dims
    }

    /// Number of elements in one frame
    pub fn len(&self) -> usize {
        self.dims().iter().product()
    }

    /// True when any axis has zero length
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for ShapeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.channels {
            Some(channels) => write!(f, "({}, {}, {})", self.height, self.width, channels),
            None => write!(f, "({}, {})", self.height, self.width),
        }
    }
}

/// Attribute value carried by frames and datasets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Flag(bool),
    List(Vec<AttrValue>),
}

/// Ordered attribute map
pub type Attrs = BTreeMap<String, AttrValue>;

impl AttrValue {
    /// Convert a JSON attribute; objects and nulls have no representation
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;

        match value {
            Value::String(s) => Some(AttrValue::Text(s.clone())),
            Value::Bool(b) => Some(AttrValue::Flag(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(AttrValue::Integer)
                .or_else(|| n.as_f64().map(AttrValue::Float)),
            Value::Array(items) => items
                .iter()
                .map(AttrValue::from_json)
                .collect::<Option<Vec<_>>>()
                .map(AttrValue::List),
            Value::Null | Value::Object(_) => None,
        }
    }

    /// Convert back to JSON for `.zattrs`
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        match self {
            AttrValue::Text(s) => Value::String(s.clone()),
            AttrValue::Integer(i) => Value::from(*i),
            AttrValue::Float(x) => serde_json::Number::from_f64(*x)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(x.to_string())),
            AttrValue::Flag(b) => Value::Bool(*b),
            AttrValue::List(items) => Value::Array(items.iter().map(AttrValue::to_json).collect()),
        }
    }
}

/// One materialized frame annotated with shot identity and target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFrame {
    /// Shot the frame was taken from
    pub shot_id: ShotId,
    /// Target scalar (NaN when the catalog had none)
    pub volume: f64,
    /// Timestamp of the selected sample
    pub time: f64,
    /// Name of the data variable in the source store
    pub variable: String,
    /// Spatial axis names
    pub dims: Vec<String>,
    /// Frame values, spatial axes only
    pub data: ArrayD<f32>,
    /// Source attributes
    pub attrs: Attrs,
}

impl ExtractedFrame {
    /// Grouping key of this frame
    pub fn shape_key(&self) -> Result<ShapeKey> {
        ShapeKey::from_dims(self.shot_id, self.data.shape())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_key_from_dims() {
        assert_eq!(ShapeKey::from_dims(1, &[448, 640]).unwrap(), ShapeKey::new(448, 640));
        assert_eq!(
            ShapeKey::from_dims(1, &[120, 160, 3]).unwrap(),
            ShapeKey::with_channels(120, 160, 3)
        );
        assert!(ShapeKey::from_dims(1, &[640]).is_err());
        assert!(ShapeKey::from_dims(1, &[1, 2, 3, 4]).is_err());
    }

    #[test]
    fn test_shape_key_ordering_and_display() {
        let small = ShapeKey::new(120, 160);
        let large = ShapeKey::new(448, 640);
        assert!(small < large);
        assert_eq!(ShapeKey::with_channels(2, 3, 4).to_string(), "(2, 3, 4)");
        assert_eq!(ShapeKey::with_channels(2, 3, 4).len(), 24);
    }

    #[test]
    fn test_attr_json_conversion() {
        let json = serde_json::json!({"CLASS": "IMAGE", "exposure": 12, "gain": 1.5, "bins": [1, 2]});
        let map = json.as_object().unwrap();

        assert_eq!(AttrValue::from_json(&map["CLASS"]), Some(AttrValue::Text("IMAGE".into())));
        assert_eq!(AttrValue::from_json(&map["exposure"]), Some(AttrValue::Integer(12)));
        assert_eq!(AttrValue::from_json(&map["gain"]), Some(AttrValue::Float(1.5)));
        assert_eq!(
            AttrValue::from_json(&map["bins"]),
            Some(AttrValue::List(vec![AttrValue::Integer(1), AttrValue::Integer(2)]))
        );
        assert_eq!(AttrValue::from_json(&serde_json::Value::Null), None);
        assert_eq!(AttrValue::Integer(12).to_json(), map["exposure"]);
    }
}
