//! Dataset preparation binary
//!
//! Configured entirely through `PREP_*` environment variables.

use std::sync::Arc;

use frameprep_core::catalog::{CsvShotCatalog, HttpShotCatalog, ShotCatalog};
use frameprep_core::config::PipelineConfig;
use frameprep_core::metrics::gather_pipeline_metrics;
use frameprep_core::source::ZarrFrameSource;
use frameprep_core::storage::S3Client;
use frameprep_core::Pipeline;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

async fn run<C: ShotCatalog>(
    catalog: C,
    config: PipelineConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Reading shots from {}/{}", config.s3.endpoint, config.s3.bucket);
    let store = Arc::new(S3Client::new(config.s3.clone())?);
    let source = Arc::new(ZarrFrameSource::new(store, config.source.clone()));

    let pipeline = Pipeline::new(catalog, source, config);
    info!("Cache artifact at {:?}", pipeline.cache().path());

    let report = match pipeline.run().await {
        Ok(report) => report,
        Err(e) => {
            error!("Preparation failed: {}", e);
            return Err(e.into());
        }
    };

    info!(
        "Split group {}: {} train, {} test ({} public / {} private)",
        report.shape,
        report.train_samples,
        report.test_samples,
        report.public_rows,
        report.private_rows
    );
    info!("Outputs: {:?}", report.outputs);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = PipelineConfig::from_env()?;
    info!(
        "Preparing campaign {} (group {}, level {})",
        config.campaign, config.extract.group, config.extract.level
    );

    match config.catalog_csv.clone() {
        Some(path) => {
            info!("Using catalog export {:?}", path);
            let catalog = CsvShotCatalog::new(path, config.catalog.fields.clone());
            run(catalog, config).await?;
        }
        None => {
            info!("Using catalog service {}", config.catalog.endpoint);
            let catalog = HttpShotCatalog::new(config.catalog.clone())?;
            run(catalog, config).await?;
        }
    }

    print!("{}", gather_pipeline_metrics());
    Ok(())
}
