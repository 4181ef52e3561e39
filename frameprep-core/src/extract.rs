//! Frame extraction
//!
//! Fetches, for every cataloged shot, the frame nearest its event time and
//! groups the frames by spatial shape. A shot the source reports as not
//! found is skipped, including one the store could not serve; any error
//! aborts the whole batch.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::catalog::ShotRecord;
use crate::data::{ExtractedFrame, ShapeKey};
use crate::error::{PrepError, Result};
use crate::metrics::standard;
use crate::source::{FetchOutcome, FrameSource, NotFoundReason};

/// Frames grouped by shape, in input order within each group
pub type FrameGroups = BTreeMap<ShapeKey, Vec<ExtractedFrame>>;

/// Configuration for frame extraction
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// Data group to read from each shot
    pub group: String,
    /// Data level of the archive
    pub level: u32,
    /// Maximum fetches in flight (1 = strictly sequential)
    pub max_concurrent_fetches: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            group: "rbb".into(),
            level: 1,
            max_concurrent_fetches: crate::DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }
}

/// Extracts per-shot frames from a `FrameSource`
pub struct FrameExtractor<S> {
    source: Arc<S>,
    config: ExtractConfig,
}

impl<S: FrameSource> FrameExtractor<S> {
    /// Create a new extractor
    pub fn new(source: Arc<S>, config: ExtractConfig) -> Self {
        Self { source, config }
    }

    /// Extractor configuration
    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    /// Fetch one frame per shot and group the frames by shape
    ///
    /// Records without an event time are ignored. Grouping and in-group
    /// order depend only on the input order, not on fetch completion order.
    pub async fn extract(&self, shots: &[ShotRecord]) -> Result<FrameGroups> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_fetches.max(1)));
        let mut tasks = JoinSet::new();

        for (position, record) in shots.iter().copied().enumerate() {
            let Some(time) = record.event_time else {
                debug!("Shot {} has no event time, ignoring", record.shot_id);
                continue;
            };

            let source = self.source.clone();
            let semaphore = semaphore.clone();
            let group = self.config.group.clone();
            let level = self.config.level;

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.map_err(|e| PrepError::Internal {
                    message: format!("fetch semaphore closed: {}", e),
                })?;
                let outcome = fetch_shot(source.as_ref(), &group, level, record, time).await?;
                Ok::<_, PrepError>((position, record.shot_id, outcome))
            });
        }

        let requested = tasks.len();
        let mut frames = Vec::with_capacity(requested);
        let mut skipped = 0usize;

        // Returning early drops the JoinSet, which aborts the remaining fetches
        while let Some(joined) = tasks.join_next().await {
            let (position, shot_id, outcome) = joined.map_err(|e| PrepError::Internal {
                message: format!("fetch task failed: {}", e),
            })??;

            match outcome {
                FetchOutcome::Found(frame) => {
                    standard::FRAMES_EXTRACTED.inc();
                    frames.push((position, frame));
                }
                FetchOutcome::NotFound(NotFoundReason::Unavailable) => {
                    standard::SHOTS_SKIPPED.inc();
                    skipped += 1;
                    warn!("Skipping shot {}: store unavailable", shot_id);
                }
                FetchOutcome::NotFound(reason) => {
                    standard::SHOTS_SKIPPED.inc();
                    skipped += 1;
                    debug!("Skipping shot {}: {}", shot_id, reason);
                }
            }
        }

        frames.sort_by_key(|(position, _)| *position);

        let mut groups = FrameGroups::new();
        for (_, frame) in frames {
            let key = frame.shape_key()?;
            groups.entry(key).or_default().push(frame);
        }

        info!(
            "Extracted {} frames from {} shots ({} skipped) into {} shape groups",
            requested - skipped,
            requested,
            skipped,
            groups.len()
        );

        Ok(groups)
    }
}

/// Select and materialize the frame nearest `time` for one shot
async fn fetch_shot<S: FrameSource>(
    source: &S,
    group: &str,
    level: u32,
    record: ShotRecord,
    time: f64,
) -> Result<FetchOutcome<ExtractedFrame>> {
    let start = Instant::now();
    standard::SHOTS_REQUESTED.inc();

    let handle = match source.select_nearest(record.shot_id, group, level, time).await? {
        FetchOutcome::Found(handle) => handle,
        FetchOutcome::NotFound(reason) => return Ok(FetchOutcome::NotFound(reason)),
    };
    let frame = match source.materialize(handle).await? {
        FetchOutcome::Found(frame) => frame,
        FetchOutcome::NotFound(reason) => return Ok(FetchOutcome::NotFound(reason)),
    };
    standard::FETCH_DURATION.observe(start.elapsed().as_secs_f64());

    if frame.dims.len() != frame.data.ndim() {
        return Err(PrepError::MalformedFrame {
            shot_id: record.shot_id,
            reason: format!(
                "{} axis names for a {}-d frame",
                frame.dims.len(),
                frame.data.ndim()
            ),
        });
    }

    Ok(FetchOutcome::Found(ExtractedFrame {
        shot_id: record.shot_id,
        volume: record.event_value.unwrap_or(f64::NAN),
        time: frame.time,
        variable: frame.variable,
        dims: frame.dims,
        data: frame.data,
        attrs: frame.attrs,
    }))
}
