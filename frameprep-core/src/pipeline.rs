//! End-to-end preparation run
//!
//! catalog -> eligible shots -> extract -> merge, behind the disk cache,
//! then select one shape group, split it and write the outputs.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::cache::{CacheKey, DiskCache};
use crate::catalog::{eligible_shots, ShotCatalog};
use crate::config::{CacheLocation, PipelineConfig};
use crate::data::{MergedDataset, ShapeGroups, ShapeKey};
use crate::error::{PrepError, Result};
use crate::extract::FrameExtractor;
use crate::merge::ShapeGroupedMerger;
use crate::output::{SplitPaths, SplitWriter};
use crate::source::FrameSource;
use crate::split::{build_split, Usage};

/// Summary of a completed run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    /// Samples per shape group
    pub group_sizes: BTreeMap<ShapeKey, usize>,
    /// Group that was split
    pub shape: ShapeKey,
    pub train_samples: usize,
    pub test_samples: usize,
    pub public_rows: usize,
    pub private_rows: usize,
    pub outputs: SplitPaths,
}

/// Preparation pipeline over a catalog and a frame source
pub struct Pipeline<C, S> {
    catalog: C,
    extractor: FrameExtractor<S>,
    merger: ShapeGroupedMerger,
    cache: DiskCache,
    writer: SplitWriter,
    config: PipelineConfig,
}

impl<C: ShotCatalog, S: FrameSource> Pipeline<C, S> {
    pub fn new(catalog: C, source: Arc<S>, config: PipelineConfig) -> Self {
        let cache = match &config.cache {
            CacheLocation::Path(path) => DiskCache::new(path.clone()),
            CacheLocation::Keyed(dir) => DiskCache::keyed(
                dir,
                CacheKey::new(
                    config.campaign.clone(),
                    config.extract.group.clone(),
                    config.extract.level,
                    config.source.variable.clone(),
                ),
            ),
        };

        Self {
            catalog,
            extractor: FrameExtractor::new(source, config.extract.clone()),
            merger: ShapeGroupedMerger::new(config.merge.clone()),
            cache,
            writer: SplitWriter::default(),
            config,
        }
    }

    /// Replace the output writer
    pub fn with_writer(mut self, writer: SplitWriter) -> Self {
        self.writer = writer;
        self
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    /// Query, extract and merge without touching the cache
    ///
    /// Fails with `NoShapeGroups` when no shot yields a frame, so an empty
    /// result never reaches the cache.
    pub async fn build_groups(&self) -> Result<ShapeGroups> {
        let records = self.catalog.query(&self.config.campaign).await?;
        info!(
            "Catalog returned {} shots for campaign {}",
            records.len(),
            self.config.campaign
        );

        let shots = eligible_shots(records);
        let frames = self.extractor.extract(&shots).await?;
        let groups = self.merger.merge(frames)?;
        if groups.is_empty() {
            return Err(PrepError::NoShapeGroups);
        }
        Ok(groups)
    }

    /// Merged groups from the cache, building them on a miss
    pub async fn load_groups(&self) -> Result<ShapeGroups> {
        self.cache.load_or_build(|| self.build_groups()).await
    }

    /// Load, split and write; nothing is written if any stage fails
    pub async fn run(&self) -> Result<PipelineReport> {
        let groups = self.load_groups().await?;
        let group_sizes: BTreeMap<ShapeKey, usize> =
            groups.iter().map(|(shape, ds)| (*shape, ds.len())).collect();
        for (shape, size) in &group_sizes {
            info!("Shape group {}: {} samples", shape, size);
        }

        let (shape, dataset) = select_group(&groups, self.config.target_shape)?;
        let split = build_split(dataset, &self.config.split)?;

        let report_counts = (
            split.train.len(),
            split.test.len(),
            split.usage_count(Usage::Public),
            split.usage_count(Usage::Private),
        );

        let writer = self.writer.clone();
        let dir = self.config.output_dir.clone();
        let outputs = tokio::task::spawn_blocking(move || writer.write_split(&dir, &split))
            .await
            .map_err(|e| PrepError::Internal {
                message: format!("output task failed: {}", e),
            })??;

        let (train_samples, test_samples, public_rows, private_rows) = report_counts;
        Ok(PipelineReport {
            group_sizes,
            shape,
            train_samples,
            test_samples,
            public_rows,
            private_rows,
            outputs,
        })
    }
}

/// The configured group, or the largest one (ties go to the smallest shape)
pub fn select_group(
    groups: &ShapeGroups,
    target: Option<ShapeKey>,
) -> Result<(ShapeKey, &MergedDataset)> {
    if groups.is_empty() {
        return Err(PrepError::NoShapeGroups);
    }

    match target {
        Some(shape) => groups
            .get(&shape)
            .map(|ds| (shape, ds))
            .ok_or(PrepError::ShapeNotFound { shape }),
        None => {
            let mut best: Option<(ShapeKey, &MergedDataset)> = None;
            // ascending key order, so only a strictly larger group replaces
            for (shape, ds) in groups {
                if best.map_or(true, |(_, b)| ds.len() > b.len()) {
                    best = Some((*shape, ds));
                }
            }
            best.ok_or(PrepError::NoShapeGroups)
        }
    }
}
