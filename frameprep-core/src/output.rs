//! Split writers
//!
//! Train and test partitions are written as Zarr v2 groups readable by
//! xarray; the solution table as CSV.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::ArrayView1;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::compression::CompressionConfig;
use crate::data::{AttrValue, Attrs, MergedDataset};
use crate::error::{PrepError, Result};
use crate::split::{SolutionRow, Split};
use crate::storage::zarr::ZarrWriter;

/// File names inside the output directory
pub const TRAIN_STORE: &str = "train.zarr";
pub const TEST_STORE: &str = "test.zarr";
pub const SOLUTION_FILE: &str = "solution.csv";

/// Paths of written split outputs
#[derive(Debug, Clone, PartialEq)]
pub struct SplitPaths {
    pub train: PathBuf,
    pub test: PathBuf,
    pub solution: PathBuf,
}

impl SplitPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            train: dir.join(TRAIN_STORE),
            test: dir.join(TEST_STORE),
            solution: dir.join(SOLUTION_FILE),
        }
    }
}

/// Writes a `Split` to a directory
#[derive(Debug, Clone)]
pub struct SplitWriter {
    compression: CompressionConfig,
    rows_per_chunk: usize,
}

impl Default for SplitWriter {
    fn default() -> Self {
        Self {
            compression: CompressionConfig::default(),
            rows_per_chunk: 16,
        }
    }
}

impl SplitWriter {
    pub fn new(compression: CompressionConfig, rows_per_chunk: usize) -> Self {
        Self {
            compression,
            rows_per_chunk: rows_per_chunk.max(1),
        }
    }

    /// Write train, test and solution as the directory `dir`
    ///
    /// The outputs are staged in a sibling directory and renamed into place,
    /// so a failed write leaves any previous contents of `dir` untouched.
    pub fn write_split(&self, dir: &Path, split: &Split) -> Result<SplitPaths> {
        let name = dir
            .file_name()
            .ok_or_else(|| PrepError::output(dir, "output path has no directory name"))?
            .to_string_lossy()
            .into_owned();
        let parent = match dir.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| PrepError::output(&parent, e))?;

        let staging = parent.join(format!(".{}.{}.pending", name, Uuid::new_v4()));
        let written = self
            .write_into(&staging, split)
            .and_then(|()| replace_dir(&staging, dir));
        if let Err(e) = written {
            if staging.exists() {
                if let Err(cleanup) = fs::remove_dir_all(&staging) {
                    debug!("Failed to remove staged split {:?}: {}", staging, cleanup);
                }
            }
            return Err(e);
        }

        info!(
            "Wrote split to {:?} ({} train, {} test, {} solution rows)",
            dir,
            split.train.len(),
            split.test.len(),
            split.solution.len()
        );
        Ok(SplitPaths::in_dir(dir))
    }

    fn write_into(&self, dir: &Path, split: &Split) -> Result<()> {
        fs::create_dir(dir).map_err(|e| PrepError::output(dir, e))?;

        let paths = SplitPaths::in_dir(dir);
        self.write_dataset(&paths.train, &split.train)?;
        self.write_dataset(&paths.test, &split.test)?;
        write_solution_csv(&paths.solution, &split.solution)
    }

    /// Write one dataset as a Zarr group
    pub fn write_dataset(&self, path: &Path, dataset: &MergedDataset) -> Result<()> {
        if path.exists() {
            fs::remove_dir_all(path).map_err(|e| PrepError::output(path, e))?;
        }

        let writer = ZarrWriter::new(path, self.compression.clone());
        writer.write_group("", &dataset.attrs)?;

        let axis = dataset.sample_axis().to_string();
        let sample_dims = [axis.clone()];

        let mut frame_attrs = Attrs::new();
        if !dataset.coords.is_empty() {
            let names: Vec<&str> = dataset.coords.keys().map(String::as_str).collect();
            frame_attrs.insert("coordinates".into(), AttrValue::Text(names.join(" ")));
        }
        writer.write_array(
            &dataset.variable,
            dataset.frames.view(),
            &dataset.dims,
            &frame_attrs,
            self.rows_per_chunk,
        )?;

        let ids: Vec<i64> = dataset.shot_ids.iter().map(|&id| i64::from(id)).collect();
        writer.write_array(
            &axis,
            ArrayView1::from(ids.as_slice()).into_dyn(),
            &sample_dims,
            &Attrs::new(),
            ids.len(),
        )?;

        for (name, values) in &dataset.coords {
            let view = ArrayView1::from(values.as_slice()).into_dyn();
            writer.write_array(name, view, &sample_dims, &Attrs::new(), values.len())?;
        }

        Ok(())
    }
}

/// Move `staging` to `dir`, swapping out an existing `dir`
fn replace_dir(staging: &Path, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return fs::rename(staging, dir).map_err(|e| PrepError::output(dir, e));
    }

    let retired = staging.with_extension("old");
    fs::rename(dir, &retired).map_err(|e| PrepError::output(dir, e))?;
    if let Err(e) = fs::rename(staging, dir) {
        if let Err(restore) = fs::rename(&retired, dir) {
            warn!("Failed to restore {:?} from {:?}: {}", dir, retired, restore);
        }
        return Err(PrepError::output(dir, e));
    }

    if let Err(e) = fs::remove_dir_all(&retired) {
        warn!("Failed to remove previous split {:?}: {}", retired, e);
    }
    Ok(())
}

/// Write the solution table as `shot_id,volume,Usage`
pub fn write_solution_csv(path: &Path, rows: &[SolutionRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| PrepError::output(path, e))?;
    if rows.is_empty() {
        writer
            .write_record(["shot_id", "volume", "Usage"])
            .map_err(|e| PrepError::output(path, e))?;
    }
    for row in rows {
        writer.serialize(row).map_err(|e| PrepError::output(path, e))?;
    }
    writer.flush().map_err(|e| PrepError::output(path, e))
}
