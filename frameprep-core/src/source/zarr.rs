//! Frame source over per-shot Zarr stores
//!
//! Layout: `{shot root}/{group}/{variable}` holds `(time, height, width[, channel])`
//! frames and `{shot root}/{group}/{time coordinate}` their timestamps.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{nearest_index, FetchOutcome, FrameSource, LocalFrame, NotFoundReason};
use crate::data::{Attrs, ShotId};
use crate::error::{PrepError, Result};
use crate::storage::zarr::{attrs_from_json, read_attrs, ZarrArray};
use crate::storage::ObjectStore;

/// Spatial axis names used when the store does not name them
const DEFAULT_SPATIAL_DIMS: [&str; 3] = ["height", "width", "channel"];

/// Configuration for the Zarr frame source
#[derive(Debug, Clone)]
pub struct ZarrSourceConfig {
    /// Shot root key, with `{level}` and `{shot_id}` placeholders
    pub shot_template: String,
    /// Data variable inside the group
    pub variable: String,
    /// Time coordinate inside the group
    pub time_coord: String,
}

impl Default for ZarrSourceConfig {
    fn default() -> Self {
        Self {
            shot_template: "level{level}/shots/{shot_id}.zarr".into(),
            variable: "data".into(),
            time_coord: "time".into(),
        }
    }
}

impl ZarrSourceConfig {
    /// Root key of one shot's store
    pub fn shot_root(&self, shot_id: ShotId, level: u32) -> String {
        self.shot_template
            .replace("{level}", &level.to_string())
            .replace("{shot_id}", &shot_id.to_string())
    }
}

/// Selected frame in a Zarr store
#[derive(Debug, Clone)]
pub struct ZarrHandle {
    pub shot_id: ShotId,
    pub index: usize,
    pub time: f64,
    array: ZarrArray,
    dims: Vec<String>,
    attrs: Attrs,
}

/// `FrameSource` reading Zarr v2 stores from an object store
pub struct ZarrFrameSource<S> {
    store: Arc<S>,
    config: ZarrSourceConfig,
}

impl<S: ObjectStore> ZarrFrameSource<S> {
    /// Create a source over `store`
    pub fn new(store: Arc<S>, config: ZarrSourceConfig) -> Self {
        Self { store, config }
    }

    /// Distinguish a missing shot from a missing group
    async fn missing_reason(&self, shot_root: &str) -> Result<NotFoundReason> {
        let marker = format!("{}/.zgroup", shot_root);
        Ok(match self.store.get_optional(&marker).await? {
            Some(_) => NotFoundReason::NoSuchGroup,
            None => NotFoundReason::NoSuchShot,
        })
    }
}

impl<S: ObjectStore> FrameSource for ZarrFrameSource<S> {
    type Handle = ZarrHandle;

    async fn select_nearest(
        &self,
        shot_id: ShotId,
        group: &str,
        level: u32,
        time: f64,
    ) -> Result<FetchOutcome<ZarrHandle>> {
        let located = self.locate(shot_id, group, level, time).await;
        skip_unavailable(shot_id, located)
    }

    async fn materialize(&self, handle: ZarrHandle) -> Result<FetchOutcome<LocalFrame>> {
        let shot_id = handle.shot_id;
        let loaded = self.load(handle).await.map(FetchOutcome::Found);
        skip_unavailable(shot_id, loaded)
    }
}

/// Turn a store failure into a skipped shot; every other error stays fatal
fn skip_unavailable<T>(
    shot_id: ShotId,
    result: Result<FetchOutcome<T>>,
) -> Result<FetchOutcome<T>> {
    match result {
        Err(e) if e.is_transient() => {
            warn!("Shot {}: skipped, {}", shot_id, e);
            Ok(FetchOutcome::NotFound(NotFoundReason::Unavailable))
        }
        other => other,
    }
}

impl<S: ObjectStore> ZarrFrameSource<S> {
    async fn locate(
        &self,
        shot_id: ShotId,
        group: &str,
        level: u32,
        time: f64,
    ) -> Result<FetchOutcome<ZarrHandle>> {
        let shot_root = self.config.shot_root(shot_id, level);
        let group_node = format!("{}/{}", shot_root, group);
        let data_key = format!("{}/{}", group_node, self.config.variable);
        let time_key = format!("{}/{}", group_node, self.config.time_coord);

        let Some(array) = ZarrArray::open(self.store.as_ref(), &data_key).await? else {
            let reason = self.missing_reason(&shot_root).await?;
            debug!("Shot {}: {} at {}", shot_id, reason, data_key);
            return Ok(FetchOutcome::NotFound(reason));
        };
        let Some(time_array) = ZarrArray::open(self.store.as_ref(), &time_key).await? else {
            debug!("Shot {}: no time coordinate at {}", shot_id, time_key);
            return Ok(FetchOutcome::NotFound(NotFoundReason::NoSuchGroup));
        };

        let malformed = |reason: String| PrepError::MalformedFrame { shot_id, reason };

        let ndim = array.shape().len();
        if !(3..=4).contains(&ndim) {
            return Err(malformed(format!(
                "{} has shape {:?}, expected (time, height, width[, channel])",
                data_key,
                array.shape()
            )));
        }
        if time_array.shape().len() != 1 {
            return Err(malformed(format!(
                "{} has shape {:?}, expected one axis",
                time_key,
                time_array.shape()
            )));
        }

        let times = time_array.read_all(self.store.as_ref()).await?;
        if times.len() != array.shape()[0] {
            return Err(malformed(format!(
                "{} time samples for {} frames",
                times.len(),
                array.shape()[0]
            )));
        }

        let times: Vec<f64> = times.iter().copied().collect();
        let Some(index) = nearest_index(&times, time) else {
            return Ok(FetchOutcome::NotFound(NotFoundReason::NoMatchingSample));
        };

        let mut attrs_json = read_attrs(self.store.as_ref(), &group_node).await?;
        attrs_json.extend(read_attrs(self.store.as_ref(), &data_key).await?);
        let (attrs, dims) = attrs_from_json(&attrs_json);

        let dims = match dims {
            Some(names) if names.len() == ndim => names[1..].to_vec(),
            _ => DEFAULT_SPATIAL_DIMS[..ndim - 1]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };

        debug!(
            "Shot {}: selected sample {} at t={} (requested {})",
            shot_id, index, times[index], time
        );

        Ok(FetchOutcome::Found(ZarrHandle {
            shot_id,
            index,
            time: times[index],
            array,
            dims,
            attrs,
        }))
    }

    async fn load(&self, handle: ZarrHandle) -> Result<LocalFrame> {
        let values = handle
            .array
            .read_index(self.store.as_ref(), handle.index)
            .await?;

        Ok(LocalFrame {
            time: handle.time,
            variable: self.config.variable.clone(),
            dims: handle.dims,
            data: values.mapv(|v| v as f32),
            attrs: handle.attrs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shot_root() {
        let config = ZarrSourceConfig::default();
        assert_eq!(config.shot_root(30420, 1), "level1/shots/30420.zarr");
    }
}
