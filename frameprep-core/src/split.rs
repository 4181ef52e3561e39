//! Reproducible train/test split with a holdout solution table
//!
//! Every random draw comes from one `ChaCha8Rng` seeded from the configured
//! seed, in a fixed order: the permutation, one discarded draw per test row,
//! then one coin flip per test row for the usage tag. Changing that order
//! changes the split.

use std::fmt;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::{MergedDataset, ShotId, TIME_COORD, VOLUME_COORD};
use crate::error::{PrepError, Result};

/// Split parameters
#[derive(Debug, Clone)]
pub struct SplitConfig {
    /// Share of samples placed in the test partition, in (0, 1)
    pub test_fraction: f64,
    /// Generator seed
    pub seed: u64,
    /// Coordinates removed from both partitions
    pub identity_coords: Vec<String>,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_fraction: crate::DEFAULT_TEST_FRACTION,
            seed: crate::DEFAULT_SEED,
            identity_coords: vec![TIME_COORD.into()],
        }
    }
}

/// Scoring visibility of a holdout row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Usage {
    Public,
    Private,
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Usage::Public => write!(f, "Public"),
            Usage::Private => write!(f, "Private"),
        }
    }
}

/// Holdout label for one test sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolutionRow {
    pub shot_id: ShotId,
    pub volume: f64,
    #[serde(rename = "Usage")]
    pub usage: Usage,
}

/// Result of `build_split`
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: MergedDataset,
    /// Test samples, without the target coordinate
    pub test: MergedDataset,
    /// One row per test sample, in test order
    pub solution: Vec<SolutionRow>,
}

impl Split {
    /// Number of solution rows tagged `usage`
    pub fn usage_count(&self, usage: Usage) -> usize {
        self.solution.iter().filter(|row| row.usage == usage).count()
    }
}

/// Number of test samples for `len` samples
pub fn test_count(len: usize, test_fraction: f64) -> usize {
    (test_fraction * len as f64).floor() as usize
}

/// Shuffle and partition one dataset
pub fn build_split(dataset: &MergedDataset, config: &SplitConfig) -> Result<Split> {
    if dataset.is_empty() {
        return Err(PrepError::EmptyDataset);
    }
    // also rejects NaN
    if !(config.test_fraction > 0.0 && config.test_fraction < 1.0) {
        return Err(PrepError::InvalidTestFraction {
            value: config.test_fraction,
        });
    }
    let Some(target) = dataset.target() else {
        return Err(PrepError::MissingTarget {
            name: VOLUME_COORD.into(),
        });
    };

    let mut working = dataset.clone();
    for name in &config.identity_coords {
        working.drop_coord(name);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

    let mut order: Vec<usize> = (0..working.len()).collect();
    order.shuffle(&mut rng);

    let cut = test_count(working.len(), config.test_fraction);
    let (test_idx, train_idx) = order.split_at(cut);

    let train = working.select(train_idx);
    let mut test = working.select(test_idx);
    test.drop_coord(VOLUME_COORD);

    // Discarded draw; kept so the usage tags below match earlier builds
    for _ in 0..test_idx.len() {
        let _: f64 = rng.gen();
    }

    let solution = test_idx
        .iter()
        .map(|&i| SolutionRow {
            shot_id: dataset.shot_ids[i],
            volume: target[i],
            usage: if rng.gen_bool(0.5) {
                Usage::Public
            } else {
                Usage::Private
            },
        })
        .collect();

    let split = Split {
        train,
        test,
        solution,
    };

    info!(
        "Split {} samples of shape {} into {} train / {} test ({} public, seed {})",
        dataset.len(),
        dataset.shape,
        split.train.len(),
        split.test.len(),
        split.usage_count(Usage::Public),
        config.seed
    );

    Ok(split)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Attrs, ShapeKey};
    use ndarray::{ArrayD, IxDyn};
    use std::collections::BTreeMap;

    fn dataset(n: usize) -> MergedDataset {
        let mut coords = BTreeMap::new();
        coords.insert(VOLUME_COORD.to_string(), (0..n).map(|i| i as f64 * 0.5).collect());
        coords.insert(TIME_COORD.to_string(), (0..n).map(|i| i as f64).collect());

        MergedDataset {
            shape: ShapeKey::new(1, 2),
            variable: "frame".into(),
            dims: vec!["shot_id".into(), "height".into(), "width".into()],
            shot_ids: (0..n as u32).map(|i| 100 + i).collect(),
            frames: ArrayD::from_shape_fn(IxDyn(&[n, 1, 2]), |idx| idx[0] as f32),
            coords,
            attrs: Attrs::new(),
        }
    }

    #[test]
    fn test_preconditions() {
        let config = SplitConfig::default();
        assert!(matches!(build_split(&dataset(0), &config), Err(PrepError::EmptyDataset)));

        for bad in [0.0, 1.0, -0.2, 1.5, f64::NAN] {
            let config = SplitConfig {
                test_fraction: bad,
                ..SplitConfig::default()
            };
            let err = build_split(&dataset(4), &config).unwrap_err();
            assert!(matches!(err, PrepError::InvalidTestFraction { .. }));
        }

        let mut no_target = dataset(4);
        no_target.drop_coord(VOLUME_COORD);
        let err = build_split(&no_target, &config).unwrap_err();
        assert!(matches!(err, PrepError::MissingTarget { .. }));
    }

    #[test]
    fn test_identity_coords_removed() {
        let split = build_split(&dataset(10), &SplitConfig::default()).unwrap();

        assert!(split.train.coord(TIME_COORD).is_none());
        assert!(split.test.coord(TIME_COORD).is_none());
        assert!(split.train.target().is_some());
        assert!(split.test.target().is_none());
    }

    #[test]
    fn test_solution_matches_test_rows() {
        let ds = dataset(10);
        let split = build_split(&ds, &SplitConfig::default()).unwrap();

        assert_eq!(split.test.len(), 3);
        assert_eq!(split.solution.len(), 3);
        for (row, &shot_id) in split.solution.iter().zip(&split.test.shot_ids) {
            assert_eq!(row.shot_id, shot_id);
            let pos = ds.position_of(shot_id).unwrap();
            assert_eq!(row.volume, ds.target().unwrap()[pos]);
        }
    }

    #[test]
    fn test_frames_follow_shot_ids() {
        let ds = dataset(6);
        let split = build_split(&ds, &SplitConfig::default()).unwrap();

        for (i, &shot_id) in split.train.shot_ids.iter().enumerate() {
            let pos = ds.position_of(shot_id).unwrap();
            assert_eq!(split.train.frame(i), ds.frame(pos));
        }
    }

    #[test]
    fn test_seed_7_assignment_is_pinned() {
        let split = build_split(&dataset(10), &SplitConfig::default()).unwrap();

        assert_eq!(split.test.shot_ids, vec![105, 104, 102]);
        assert_eq!(split.train.shot_ids, vec![100, 103, 106, 107, 108, 109, 101]);
        let usage: Vec<Usage> = split.solution.iter().map(|row| row.usage).collect();
        // without the discarded draws this would start with Private
        assert_eq!(usage, vec![Usage::Public, Usage::Public, Usage::Public]);

        let split = build_split(&dataset(20), &SplitConfig::default()).unwrap();
        assert_eq!(split.test.shot_ids, vec![102, 100, 105, 115, 116, 106]);
        let usage: Vec<Usage> = split.solution.iter().map(|row| row.usage).collect();
        assert_eq!(
            usage,
            vec![
                Usage::Public,
                Usage::Public,
                Usage::Public,
                Usage::Private,
                Usage::Public,
                Usage::Private,
            ]
        );
    }

    #[test]
    fn test_target_kept_when_listed_as_identity_coord() {
        let ds = dataset(10);
        let config = SplitConfig {
            identity_coords: vec![TIME_COORD.into(), VOLUME_COORD.into()],
            ..SplitConfig::default()
        };
        let split = build_split(&ds, &config).unwrap();

        assert_eq!(split.solution.len(), 3);
        let volumes: Vec<f64> = split.solution.iter().map(|row| row.volume).collect();
        assert_eq!(volumes, vec![2.5, 2.0, 1.0]);
    }

    #[test]
    fn test_usage_display() {
        assert_eq!(Usage::Public.to_string(), "Public");
        assert_eq!(Usage::Private.to_string(), "Private");
        assert_eq!(test_count(3, 0.3), 0);
        assert_eq!(test_count(10, 0.3), 3);
    }
}
