//! Read-through cache behavior

use std::collections::BTreeMap;

use frameprep_core::cache::{CacheKey, DiskCache};
use frameprep_core::compression::CompressionConfig;
use frameprep_core::data::{AttrValue, Attrs, MergedDataset, ShapeGroups, ShapeKey};
use frameprep_core::{PrepError, Result};
use ndarray::{ArrayD, Dimension, IxDyn};
use parking_lot::Mutex;

fn groups() -> ShapeGroups {
    let mut groups = ShapeGroups::new();
    for (shape, n) in [(ShapeKey::new(4, 5), 3usize), (ShapeKey::with_channels(2, 2, 3), 1)] {
        let mut dims = vec![n];
        dims.extend(shape.dims());
        let mut names = vec!["shot_id".to_string(), "height".into(), "width".into()];
        if shape.channels.is_some() {
            names.push("channel".into());
        }
        let mut coords = BTreeMap::new();
        coords.insert("volume".to_string(), (0..n).map(|i| 0.25 * i as f64).collect());
        let mut attrs = Attrs::new();
        attrs.insert("units".into(), AttrValue::Text("counts".into()));

        groups.insert(
            shape,
            MergedDataset {
                shape,
                variable: "frame".into(),
                dims: names,
                shot_ids: (0..n as u32).map(|i| 100 + i).collect(),
                frames: ArrayD::from_shape_fn(IxDyn(&dims), |idx| idx.slice().iter().sum::<usize>() as f32),
                coords,
                attrs,
            },
        );
    }
    groups
}

#[tokio::test]
async fn test_builder_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::new(dir.path().join("frames.bin"));
    let calls = Mutex::new(0usize);
    let counter = &calls;

    let build = move || async move {
        *counter.lock() += 1;
        Ok::<_, PrepError>(groups())
    };

    let first = cache.load_or_build(build).await.unwrap();
    let second = cache.load_or_build(build).await.unwrap();

    assert_eq!(*calls.lock(), 1);
    assert_eq!(first, second);
    assert_eq!(second, groups());
}

#[tokio::test]
async fn test_uncompressed_artifact_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::new(dir.path().join("frames.bin")).with_compression(CompressionConfig::disabled());

    cache.store(&groups()).await.unwrap();
    assert_eq!(cache.load().await.unwrap(), Some(groups()));
}

#[tokio::test]
async fn test_missing_artifact_loads_as_none() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::new(dir.path().join("absent.bin"));

    assert!(cache.load().await.unwrap().is_none());
}

#[tokio::test]
async fn test_corrupt_artifact_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frames.bin");
    std::fs::write(&path, b"not an artifact").unwrap();

    let cache = DiskCache::new(&path);
    let calls = Mutex::new(0usize);
    let counter = &calls;
    let result: Result<ShapeGroups> = cache
        .load_or_build(move || async move {
            *counter.lock() += 1;
            Ok(groups())
        })
        .await;

    let err = result.unwrap_err();
    assert!(err.is_corruption());
    assert_eq!(*calls.lock(), 0);
    // the bad artifact is left in place
    assert_eq!(std::fs::read(&path).unwrap(), b"not an artifact");
}

#[tokio::test]
async fn test_truncated_artifact_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::new(dir.path().join("frames.bin"));
    cache.store(&groups()).await.unwrap();

    let bytes = std::fs::read(cache.path()).unwrap();
    std::fs::write(cache.path(), &bytes[..bytes.len() / 2]).unwrap();

    let err = cache.load().await.unwrap_err();
    assert!(matches!(err, PrepError::CacheCorrupt { .. }));
}

#[tokio::test]
async fn test_missing_parent_directory_is_not_created() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DiskCache::new(dir.path().join("nested").join("frames.bin"));

    let err = cache.load_or_build(|| async { Ok(groups()) }).await.unwrap_err();
    assert!(matches!(err, PrepError::CacheIo { .. }));
    assert!(!dir.path().join("nested").exists());
}

#[tokio::test]
async fn test_keyed_cache_rejects_other_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let rbb = DiskCache::keyed(dir.path(), CacheKey::new("M9", "rbb", 1, "data"));
    let rba = DiskCache::keyed(dir.path(), CacheKey::new("M9", "rba", 1, "data"));
    assert_ne!(rbb.path(), rba.path());

    rbb.store(&groups()).await.unwrap();
    assert!(rba.load().await.unwrap().is_none());

    // an artifact moved under another key's name
    std::fs::copy(rbb.path(), rba.path()).unwrap();
    let err = rba.load().await.unwrap_err();
    assert!(matches!(err, PrepError::CacheKeyMismatch { .. }));

    assert_eq!(rbb.load().await.unwrap(), Some(groups()));
}

#[tokio::test]
async fn test_keyed_cache_rejects_unkeyed_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let keyed = DiskCache::keyed(dir.path(), CacheKey::new("M9", "rbb", 1, "data"));
    DiskCache::new(keyed.path()).store(&groups()).await.unwrap();

    let err = keyed.load().await.unwrap_err();
    match err {
        PrepError::CacheKeyMismatch { found, .. } => assert_eq!(found, "an unkeyed build"),
        other => panic!("unexpected error: {other}"),
    }
}
