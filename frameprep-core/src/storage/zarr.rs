//! Zarr v2 array access
//!
//! Reads arrays from any `ObjectStore` and writes xarray-compatible groups
//! to a local directory. Supported: C order, no filters, `null` or `zstd`
//! compressor, little-endian integer and float dtypes.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Slice};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ObjectStore;
use crate::compression::{self, CompressionAlgorithm, CompressionConfig};
use crate::data::{AttrValue, Attrs};
use crate::error::{PrepError, Result};

/// xarray's attribute naming the axes of an array
pub const ARRAY_DIMENSIONS_ATTR: &str = "_ARRAY_DIMENSIONS";

/// Contents of a `.zarray` document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayMeta {
    pub zarr_format: u32,
    pub shape: Vec<usize>,
    pub chunks: Vec<usize>,
    pub dtype: String,
    pub compressor: Option<CompressorMeta>,
    #[serde(default)]
    pub fill_value: serde_json::Value,
    #[serde(default = "default_order")]
    pub order: String,
    #[serde(default)]
    pub filters: Option<Vec<serde_json::Value>>,
    #[serde(default = "default_separator")]
    pub dimension_separator: String,
}

fn default_order() -> String {
    "C".into()
}

fn default_separator() -> String {
    ".".into()
}

/// Compressor entry of a `.zarray` document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressorMeta {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<i32>,
}

/// Element types the reader understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    I64,
    F32,
    F64,
}

macro_rules! decode_le {
    ($bytes:expr, $ty:ty) => {
        $bytes
            .chunks_exact(std::mem::size_of::<$ty>())
            .map(|b| {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(b);
                <$ty>::from_le_bytes(buf) as f64
            })
            .collect()
    };
}

impl Dtype {
    /// Parse a numpy-style type string such as `<u2` or `|u1`
    pub fn parse(key: &str, dtype: &str) -> Result<Self> {
        let unsupported = || PrepError::UnsupportedDtype {
            key: key.into(),
            dtype: dtype.into(),
        };

        let (order, code) = dtype.split_at(dtype.len().min(1));
        let parsed = match code {
            "u1" => Dtype::U8,
            "i1" => Dtype::I8,
            "u2" => Dtype::U16,
            "i2" => Dtype::I16,
            "u4" => Dtype::U32,
            "i4" => Dtype::I32,
            "i8" => Dtype::I64,
            "f4" => Dtype::F32,
            "f8" => Dtype::F64,
            _ => return Err(unsupported()),
        };

        match order {
            "<" | "|" => Ok(parsed),
            ">" if parsed.size() == 1 => Ok(parsed),
            _ => Err(unsupported()),
        }
    }

    /// Bytes per element
    pub fn size(&self) -> usize {
        match self {
            Dtype::U8 | Dtype::I8 => 1,
            Dtype::U16 | Dtype::I16 => 2,
            Dtype::U32 | Dtype::I32 | Dtype::F32 => 4,
            Dtype::I64 | Dtype::F64 => 8,
        }
    }

    fn decode(&self, bytes: &[u8]) -> Vec<f64> {
        match self {
            Dtype::U8 => bytes.iter().map(|&b| b as f64).collect(),
            Dtype::I8 => bytes.iter().map(|&b| b as i8 as f64).collect(),
            Dtype::U16 => decode_le!(bytes, u16),
            Dtype::I16 => decode_le!(bytes, i16),
            Dtype::U32 => decode_le!(bytes, u32),
            Dtype::I32 => decode_le!(bytes, i32),
            Dtype::I64 => decode_le!(bytes, i64),
            Dtype::F32 => decode_le!(bytes, f32),
            Dtype::F64 => decode_le!(bytes, f64),
        }
    }
}

/// An opened array: its key and parsed metadata
#[derive(Debug, Clone)]
pub struct ZarrArray {
    key: String,
    meta: ArrayMeta,
    dtype: Dtype,
}

impl ZarrArray {
    /// Open the array stored under `key`; `None` if it has no `.zarray`
    pub async fn open<S: ObjectStore>(store: &S, key: &str) -> Result<Option<Self>> {
        let meta_key = format!("{}/.zarray", key);
        let Some(raw) = store.get_optional(&meta_key).await? else {
            return Ok(None);
        };

        let meta: ArrayMeta =
            serde_json::from_slice(&raw).map_err(|e| PrepError::MalformedMetadata {
                key: meta_key.clone(),
                reason: e.to_string(),
            })?;

        Self::from_meta(key, meta).map(Some)
    }

    /// Validate metadata for an array stored under `key`
    pub fn from_meta(key: &str, meta: ArrayMeta) -> Result<Self> {
        let malformed = |reason: String| PrepError::MalformedMetadata {
            key: key.into(),
            reason,
        };

        if meta.zarr_format != 2 {
            return Err(malformed(format!("zarr_format {}", meta.zarr_format)));
        }
        if meta.shape.is_empty() || meta.shape.len() != meta.chunks.len() {
            return Err(malformed(format!(
                "shape {:?} does not match chunks {:?}",
                meta.shape, meta.chunks
            )));
        }
        if meta.chunks.contains(&0) {
            return Err(malformed("zero-length chunk".into()));
        }
        if meta.order != "C" {
            return Err(PrepError::UnsupportedCodec {
                key: key.into(),
                codec: format!("order {}", meta.order),
            });
        }
        if meta.filters.as_ref().is_some_and(|f| !f.is_empty()) {
            return Err(PrepError::UnsupportedCodec {
                key: key.into(),
                codec: "filters".into(),
            });
        }
        if let Some(compressor) = &meta.compressor {
            if compressor.id != "zstd" {
                return Err(PrepError::UnsupportedCodec {
                    key: key.into(),
                    codec: compressor.id.clone(),
                });
            }
        }

        let dtype = Dtype::parse(key, &meta.dtype)?;
        Ok(Self {
            key: key.into(),
            meta,
            dtype,
        })
    }

    /// Array shape
    pub fn shape(&self) -> &[usize] {
        &self.meta.shape
    }

    /// Value used for chunks that were never written
    pub fn fill_value(&self) -> f64 {
        match &self.meta.fill_value {
            serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
            serde_json::Value::String(s) => match s.as_str() {
                "NaN" => f64::NAN,
                "Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                _ => 0.0,
            },
            _ => 0.0,
        }
    }

    fn chunk_key(&self, index: &[usize]) -> String {
        let parts: Vec<String> = index.iter().map(usize::to_string).collect();
        format!("{}/{}", self.key, parts.join(&self.meta.dimension_separator))
    }

    fn decode_chunk(&self, key: &str, raw: &[u8]) -> Result<ArrayD<f64>> {
        let bytes = match &self.meta.compressor {
            Some(_) => compression::decompress_zstd(raw).map_err(|e| PrepError::MalformedMetadata {
                key: key.into(),
                reason: e.to_string(),
            })?,
            None => bytes::Bytes::copy_from_slice(raw),
        };

        let expected = self.meta.chunks.iter().product::<usize>() * self.dtype.size();
        if bytes.len() != expected {
            return Err(PrepError::MalformedMetadata {
                key: key.into(),
                reason: format!("chunk holds {} bytes, expected {}", bytes.len(), expected),
            });
        }

        ArrayD::from_shape_vec(IxDyn(&self.meta.chunks), self.dtype.decode(&bytes)).map_err(|e| {
            PrepError::MalformedMetadata {
                key: key.into(),
                reason: e.to_string(),
            }
        })
    }

    /// Read rows `[start, start + count)` of the leading axis, all other axes whole
    pub async fn read_rows<S: ObjectStore>(
        &self,
        store: &S,
        start: usize,
        count: usize,
    ) -> Result<ArrayD<f64>> {
        let shape = &self.meta.shape;
        let chunks = &self.meta.chunks;
        let end = (start + count).min(shape[0]);

        let mut out_shape = shape.clone();
        out_shape[0] = end.saturating_sub(start);
        let mut out = ArrayD::from_elem(IxDyn(&out_shape), self.fill_value());
        if start >= end {
            return Ok(out);
        }

        let rest_grid: Vec<usize> = (1..shape.len())
            .map(|d| shape[d].div_ceil(chunks[d]))
            .collect();

        for c0 in (start / chunks[0])..=((end - 1) / chunks[0]) {
            let lo0 = (c0 * chunks[0]).max(start);
            let hi0 = ((c0 + 1) * chunks[0]).min(end);

            for rest in grid_indices(&rest_grid) {
                let mut chunk_index = vec![c0];
                chunk_index.extend_from_slice(&rest);

                let key = self.chunk_key(&chunk_index);
                let Some(raw) = store.get_optional(&key).await? else {
                    continue;
                };
                let chunk = self.decode_chunk(&key, &raw)?;

                let mut src = vec![Slice::from(lo0 - c0 * chunks[0]..hi0 - c0 * chunks[0])];
                let mut dst = vec![Slice::from(lo0 - start..hi0 - start)];
                for (d, &c) in rest.iter().enumerate() {
                    let axis = d + 1;
                    let lo = c * chunks[axis];
                    let hi = (lo + chunks[axis]).min(shape[axis]);
                    src.push(Slice::from(0..hi - lo));
                    dst.push(Slice::from(lo..hi));
                }

                out.slice_each_axis_mut(|ax| dst[ax.axis.index()])
                    .assign(&chunk.slice_each_axis(|ax| src[ax.axis.index()]));
            }
        }

        debug!("Read rows {}..{} of {}", start, end, self.key);
        Ok(out)
    }

    /// Read the whole array
    pub async fn read_all<S: ObjectStore>(&self, store: &S) -> Result<ArrayD<f64>> {
        self.read_rows(store, 0, self.meta.shape[0]).await
    }

    /// Read the sub-array at one index of the leading axis
    pub async fn read_index<S: ObjectStore>(&self, store: &S, index: usize) -> Result<ArrayD<f64>> {
        if index >= self.meta.shape[0] {
            return Err(PrepError::Internal {
                message: format!("index {} out of bounds for {}", index, self.key),
            });
        }
        let rows = self.read_rows(store, index, 1).await?;
        Ok(rows.index_axis_move(Axis(0), 0))
    }
}

/// Read the `.zattrs` of a node; a missing document is an empty map
pub async fn read_attrs<S: ObjectStore>(store: &S, node: &str) -> Result<serde_json::Map<String, serde_json::Value>> {
    let key = format!("{}/.zattrs", node);
    match store.get_optional(&key).await? {
        Some(raw) => serde_json::from_slice(&raw).map_err(|e| PrepError::MalformedMetadata {
            key,
            reason: e.to_string(),
        }),
        None => Ok(serde_json::Map::new()),
    }
}

/// Every index of a chunk grid, in C order
fn grid_indices(grid: &[usize]) -> Vec<Vec<usize>> {
    let mut out = vec![Vec::new()];
    for &n in grid {
        out = out
            .into_iter()
            .flat_map(|prefix| {
                (0..n).map(move |i| {
                    let mut index = prefix.clone();
                    index.push(i);
                    index
                })
            })
            .collect();
    }
    out
}

/// Element types the writer can emit
pub trait Element: Copy + Default {
    /// numpy type string
    const DTYPE: &'static str;

    fn put_le(self, out: &mut Vec<u8>);
}

macro_rules! impl_element {
    ($ty:ty, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: &'static str = $dtype;

            fn put_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
        }
    };
}

impl_element!(u8, "|u1");
impl_element!(u16, "<u2");
impl_element!(u32, "<u4");
impl_element!(i64, "<i8");
impl_element!(f32, "<f4");
impl_element!(f64, "<f8");

/// Writes Zarr v2 groups and arrays below a local root
#[derive(Debug, Clone)]
pub struct ZarrWriter {
    root: PathBuf,
    compression: CompressionConfig,
}

impl ZarrWriter {
    /// Create a writer rooted at `root`
    pub fn new(root: impl Into<PathBuf>, compression: CompressionConfig) -> Self {
        Self {
            root: root.into(),
            compression,
        }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn node_dir(&self, node: &str) -> PathBuf {
        if node.is_empty() {
            self.root.clone()
        } else {
            self.root.join(node)
        }
    }

    fn write_json(&self, path: &Path, value: &serde_json::Value) -> Result<()> {
        let text = serde_json::to_string_pretty(value).map_err(|e| PrepError::output(path, e))?;
        fs::write(path, text).map_err(|e| PrepError::output(path, e))
    }

    /// Create a group node with attributes
    pub fn write_group(&self, node: &str, attrs: &Attrs) -> Result<()> {
        let dir = self.node_dir(node);
        fs::create_dir_all(&dir).map_err(|e| PrepError::output(&dir, e))?;

        self.write_json(&dir.join(".zgroup"), &serde_json::json!({ "zarr_format": 2 }))?;
        self.write_json(&dir.join(".zattrs"), &attrs_to_json(attrs, None))
    }

    /// Write an array chunked along its leading axis
    pub fn write_array<T: Element>(
        &self,
        node: &str,
        data: ArrayViewD<'_, T>,
        dims: &[String],
        attrs: &Attrs,
        rows_per_chunk: usize,
    ) -> Result<()> {
        let dir = self.node_dir(node);
        fs::create_dir_all(&dir).map_err(|e| PrepError::output(&dir, e))?;

        let shape = data.shape().to_vec();
        if shape.is_empty() {
            return Err(PrepError::output(&dir, "scalar arrays are not supported"));
        }
        let mut chunks = shape.clone();
        chunks[0] = rows_per_chunk.max(1);
        // zero-length axes still need a non-zero chunk extent
        for c in chunks.iter_mut() {
            *c = (*c).max(1);
        }

        let compressor = match self.compression.algorithm {
            CompressionAlgorithm::Zstd => Some(CompressorMeta {
                id: "zstd".into(),
                level: Some(self.compression.level.value()),
            }),
            CompressionAlgorithm::None => None,
        };

        let meta = ArrayMeta {
            zarr_format: 2,
            shape: shape.clone(),
            chunks: chunks.clone(),
            dtype: T::DTYPE.into(),
            compressor,
            fill_value: serde_json::json!(0),
            order: "C".into(),
            filters: None,
            dimension_separator: ".".into(),
        };
        let meta_json = serde_json::to_value(&meta).map_err(|e| PrepError::output(&dir, e))?;
        self.write_json(&dir.join(".zarray"), &meta_json)?;
        self.write_json(&dir.join(".zattrs"), &attrs_to_json(attrs, Some(dims)))?;

        let row_chunks = shape[0].div_ceil(chunks[0]);
        let rest = vec![0usize; shape.len() - 1];
        for c0 in 0..row_chunks {
            let lo = c0 * chunks[0];
            let hi = (lo + chunks[0]).min(shape[0]);

            let mut padded = ArrayD::<T>::default(IxDyn(&chunks));
            padded
                .slice_each_axis_mut(|ax| {
                    if ax.axis.index() == 0 {
                        Slice::from(0..hi - lo)
                    } else {
                        Slice::from(0..shape[ax.axis.index()])
                    }
                })
                .assign(&data.slice_axis(Axis(0), Slice::from(lo..hi)));

            let mut raw = Vec::with_capacity(padded.len() * std::mem::size_of::<T>());
            for value in padded.iter() {
                value.put_le(&mut raw);
            }

            let encoded = match self.compression.algorithm {
                CompressionAlgorithm::Zstd => {
                    compression::compress_zstd(&raw, self.compression.level.value())?.to_vec()
                }
                CompressionAlgorithm::None => raw,
            };

            let mut index = vec![c0];
            index.extend_from_slice(&rest);
            let name: Vec<String> = index.iter().map(usize::to_string).collect();
            let path = dir.join(name.join("."));
            fs::write(&path, encoded).map_err(|e| PrepError::output(&path, e))?;
        }

        Ok(())
    }
}

/// Attributes as a `.zattrs` document, optionally naming the axes
pub fn attrs_to_json(attrs: &Attrs, dims: Option<&[String]>) -> serde_json::Value {
    let mut map: serde_json::Map<String, serde_json::Value> = attrs
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect();
    if let Some(dims) = dims {
        map.insert(ARRAY_DIMENSIONS_ATTR.into(), serde_json::json!(dims));
    }
    serde_json::Value::Object(map)
}

/// Attributes from a `.zattrs` document, returning axis names separately
pub fn attrs_from_json(map: &serde_json::Map<String, serde_json::Value>) -> (Attrs, Option<Vec<String>>) {
    let mut attrs = Attrs::new();
    let mut dims = None;

    for (name, value) in map {
        if name == ARRAY_DIMENSIONS_ATTR {
            dims = value.as_array().map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str().map(str::to_string))
                    .collect()
            });
        } else if let Some(attr) = AttrValue::from_json(value) {
            attrs.insert(name.clone(), attr);
        }
    }

    (attrs, dims)
}
