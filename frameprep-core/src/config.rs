//! Pipeline configuration
//!
//! Every component keeps its own `Default` config; `PipelineConfig` gathers
//! them and can be filled from `PREP_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use crate::catalog::CatalogConfig;
use crate::data::ShapeKey;
use crate::error::{PrepError, Result};
use crate::extract::ExtractConfig;
use crate::merge::MergeConfig;
use crate::source::ZarrSourceConfig;
use crate::split::SplitConfig;
use crate::storage::S3Config;

/// Where merged groups are cached
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLocation {
    /// Fixed artifact path, no key check
    Path(PathBuf),
    /// Directory holding artifacts named after their build parameters
    Keyed(PathBuf),
}

/// Configuration of a full preparation run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Campaign passed to the shot catalog
    pub campaign: String,
    /// Shape group to split; `None` picks the largest group
    pub target_shape: Option<ShapeKey>,
    pub cache: CacheLocation,
    /// Directory receiving train, test and solution outputs
    pub output_dir: PathBuf,
    /// CSV catalog export; the HTTP catalog is used when unset
    pub catalog_csv: Option<PathBuf>,
    pub s3: S3Config,
    pub catalog: CatalogConfig,
    pub source: ZarrSourceConfig,
    pub extract: ExtractConfig,
    pub merge: MergeConfig,
    pub split: SplitConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            campaign: "M9".into(),
            target_shape: None,
            cache: CacheLocation::Keyed(PathBuf::from("cache")),
            output_dir: PathBuf::from("data"),
            catalog_csv: None,
            s3: S3Config::default(),
            catalog: CatalogConfig::default(),
            source: ZarrSourceConfig::default(),
            extract: ExtractConfig::default(),
            merge: MergeConfig::default(),
            split: SplitConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `PREP_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("PREP_CAMPAIGN") {
            config.campaign = v;
        }
        if let Some(v) = lookup("PREP_SHAPE") {
            config.target_shape = Some(parse_shape("PREP_SHAPE", &v)?);
        }
        if let Some(v) = lookup("PREP_CACHE_DIR") {
            config.cache = CacheLocation::Keyed(v.into());
        }
        // a fixed path wins over a keyed directory
        if let Some(v) = lookup("PREP_CACHE_PATH") {
            config.cache = CacheLocation::Path(v.into());
        }
        if let Some(v) = lookup("PREP_OUTPUT_DIR") {
            config.output_dir = v.into();
        }
        config.catalog_csv = lookup("PREP_CATALOG_CSV").map(PathBuf::from);

        if let Some(v) = lookup("PREP_S3_ENDPOINT") {
            config.s3.endpoint = v;
        }
        if let Some(v) = lookup("PREP_S3_BUCKET") {
            config.s3.bucket = v;
        }
        if let Some(v) = lookup("PREP_CATALOG_URL") {
            config.catalog.endpoint = v;
        }
        if let Some(v) = lookup("PREP_SHOT_TEMPLATE") {
            config.source.shot_template = v;
        }
        if let Some(v) = lookup("PREP_VARIABLE") {
            config.source.variable = v;
        }
        if let Some(v) = lookup("PREP_GROUP") {
            config.extract.group = v;
        }
        if let Some(v) = lookup("PREP_LEVEL") {
            config.extract.level = parse_value("PREP_LEVEL", &v)?;
        }
        if let Some(v) = lookup("PREP_MAX_FETCHES") {
            config.extract.max_concurrent_fetches = parse_value("PREP_MAX_FETCHES", &v)?;
        }
        if let Some(v) = lookup("PREP_TEST_FRACTION") {
            config.split.test_fraction = parse_value("PREP_TEST_FRACTION", &v)?;
        }
        if let Some(v) = lookup("PREP_SEED") {
            config.split.seed = parse_value("PREP_SEED", &v)?;
        }

        Ok(config)
    }
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| PrepError::Configuration {
        name: name.into(),
        reason: format!("{:?}: {}", raw, e),
    })
}

/// Parse `HxW` or `HxWxC`
pub fn parse_shape(name: &str, raw: &str) -> Result<ShapeKey> {
    let dims = raw
        .split('x')
        .map(|part| parse_value::<usize>(name, part))
        .collect::<Result<Vec<_>>>()?;

    match dims.as_slice() {
        [h, w] => Ok(ShapeKey::new(*h, *w)),
        [h, w, c] => Ok(ShapeKey::with_channels(*h, *w, *c)),
        _ => Err(PrepError::Configuration {
            name: name.into(),
            reason: format!("expected HxW or HxWxC, got {:?}", raw),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.campaign, "M9");
        assert_eq!(config.extract.group, "rbb");
        assert_eq!(config.extract.level, 1);
        assert_eq!(config.source.variable, "data");
        assert_eq!(config.split.test_fraction, 0.3);
        assert_eq!(config.split.seed, 7);
        assert_eq!(config.target_shape, None);
    }

    #[test]
    fn test_overrides() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("PREP_SHAPE", "448x640"),
            ("PREP_SEED", "11"),
            ("PREP_CACHE_DIR", "/tmp/a"),
            ("PREP_CACHE_PATH", "/tmp/b.bin"),
        ]))
        .unwrap();

        assert_eq!(config.target_shape, Some(ShapeKey::new(448, 640)));
        assert_eq!(config.split.seed, 11);
        assert_eq!(config.cache, CacheLocation::Path("/tmp/b.bin".into()));
    }

    #[test]
    fn test_bad_values() {
        let err = PipelineConfig::from_lookup(lookup(&[("PREP_LEVEL", "one")])).unwrap_err();
        assert!(matches!(err, PrepError::Configuration { ref name, .. } if name == "PREP_LEVEL"));

        assert!(parse_shape("PREP_SHAPE", "448").is_err());
        assert_eq!(
            parse_shape("PREP_SHAPE", "448x640x3").unwrap(),
            ShapeKey::with_channels(448, 640, 3)
        );
    }
}
