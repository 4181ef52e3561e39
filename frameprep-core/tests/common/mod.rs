//! In-memory catalog and frame source shared by the integration tests

#![allow(dead_code)]

use std::collections::HashMap;

use frameprep_core::catalog::{ShotCatalog, ShotRecord};
use frameprep_core::data::{AttrValue, Attrs, ShapeKey, ShotId};
use frameprep_core::error::{PrepError, Result};
use frameprep_core::source::{FetchOutcome, FrameSource, LocalFrame, NotFoundReason};
use ndarray::{ArrayD, IxDyn};
use parking_lot::Mutex;

/// What the mock source does for one shot
#[derive(Debug, Clone)]
pub enum MockShot {
    /// Return a frame of `shape` filled with the shot id
    Frame { shape: ShapeKey, attrs: Attrs },
    /// Report the shot as not found
    Missing(NotFoundReason),
    /// Fail with a malformed-frame error
    Broken,
}

impl MockShot {
    pub fn frame(shape: ShapeKey) -> Self {
        let mut attrs = Attrs::new();
        attrs.insert("CLASS".into(), AttrValue::Text("IMAGE".into()));
        attrs.insert("uda_name".into(), AttrValue::Text("RBB".into()));
        attrs.insert("units".into(), AttrValue::Text("counts".into()));
        MockShot::Frame { shape, attrs }
    }
}

/// Frame source serving canned shots and logging every selection
#[derive(Default)]
pub struct MockSource {
    shots: HashMap<ShotId, MockShot>,
    pub selected: Mutex<Vec<ShotId>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shot(mut self, shot_id: ShotId, shot: MockShot) -> Self {
        self.shots.insert(shot_id, shot);
        self
    }

    pub fn selections(&self) -> Vec<ShotId> {
        self.selected.lock().clone()
    }
}

pub struct MockHandle {
    shot_id: ShotId,
    time: f64,
    shape: ShapeKey,
    attrs: Attrs,
}

impl FrameSource for MockSource {
    type Handle = MockHandle;

    async fn select_nearest(
        &self,
        shot_id: ShotId,
        _group: &str,
        _level: u32,
        time: f64,
    ) -> Result<FetchOutcome<MockHandle>> {
        self.selected.lock().push(shot_id);

        match self.shots.get(&shot_id) {
            None => Ok(FetchOutcome::NotFound(NotFoundReason::NoSuchShot)),
            Some(MockShot::Missing(reason)) => Ok(FetchOutcome::NotFound(*reason)),
            Some(MockShot::Broken) => Err(PrepError::MalformedFrame {
                shot_id,
                reason: "time coordinate is not monotonic".into(),
            }),
            Some(MockShot::Frame { shape, attrs }) => Ok(FetchOutcome::Found(MockHandle {
                shot_id,
                time,
                shape: *shape,
                attrs: attrs.clone(),
            })),
        }
    }

    async fn materialize(&self, handle: MockHandle) -> Result<FetchOutcome<LocalFrame>> {
        let dims: Vec<String> = ["height", "width", "channel"][..handle.shape.dims().len()]
            .iter()
            .map(|s| s.to_string())
            .collect();

        Ok(FetchOutcome::Found(LocalFrame {
            time: handle.time,
            variable: "data".into(),
            dims,
            data: ArrayD::from_elem(IxDyn(&handle.shape.dims()), handle.shot_id as f32),
            attrs: handle.attrs,
        }))
    }
}

/// Catalog returning a fixed list of records for any campaign
pub struct MockCatalog {
    pub records: Vec<ShotRecord>,
    pub queries: Mutex<usize>,
}

impl MockCatalog {
    pub fn new(records: Vec<ShotRecord>) -> Self {
        Self {
            records,
            queries: Mutex::new(0),
        }
    }
}

impl ShotCatalog for MockCatalog {
    async fn query(&self, _campaign: &str) -> Result<Vec<ShotRecord>> {
        *self.queries.lock() += 1;
        Ok(self.records.clone())
    }
}

/// Record with an event time and value
pub fn record(shot_id: ShotId, time: f64, value: f64) -> ShotRecord {
    ShotRecord::new(shot_id, Some(time), Some(value))
}
