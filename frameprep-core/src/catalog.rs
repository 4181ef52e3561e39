//! Shot catalog access
//!
//! A catalog lists the shots of a campaign together with the timestamp and
//! value of the event of interest. Rows without an event time cannot be
//! located in a shot's time series and are dropped by `eligible_shots`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::data::ShotId;
use crate::error::{PrepError, Result};

/// One catalog row
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShotRecord {
    pub shot_id: ShotId,
    pub event_time: Option<f64>,
    pub event_value: Option<f64>,
}

impl ShotRecord {
    pub fn new(shot_id: ShotId, event_time: Option<f64>, event_value: Option<f64>) -> Self {
        Self {
            shot_id,
            event_time,
            event_value,
        }
    }
}

/// Source of shot metadata
pub trait ShotCatalog: Send + Sync {
    /// Rows for every shot of `campaign`
    fn query(&self, campaign: &str) -> impl Future<Output = Result<Vec<ShotRecord>>> + Send;
}

/// Keep only rows that carry a finite event time
pub fn eligible_shots(records: Vec<ShotRecord>) -> Vec<ShotRecord> {
    let total = records.len();
    let kept: Vec<ShotRecord> = records
        .into_iter()
        .filter(|r| r.event_time.is_some_and(f64::is_finite))
        .collect();

    if kept.len() < total {
        info!(
            "Dropped {} of {} shots without an event time",
            total - kept.len(),
            total
        );
    }
    kept
}

/// Column / field names of the event columns
#[derive(Debug, Clone)]
pub struct CatalogFields {
    pub shot_id: String,
    pub campaign: String,
    pub event_time: String,
    pub event_value: String,
}

impl Default for CatalogFields {
    fn default() -> Self {
        Self {
            shot_id: "shot_id".into(),
            campaign: "campaign".into(),
            event_time: "cpf_tvol_max".into(),
            event_value: "cpf_vol_max".into(),
        }
    }
}

fn parse_optional_f64(field: &str, raw: &str) -> Result<Option<f64>> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") || raw.eq_ignore_ascii_case("null") {
        return Ok(None);
    }
    raw.parse::<f64>().map(Some).map_err(|e| PrepError::CatalogError {
        message: format!("bad {} value {:?}: {}", field, raw, e),
    })
}

/// Catalog backed by a local CSV export
#[derive(Debug, Clone)]
pub struct CsvShotCatalog {
    path: PathBuf,
    fields: CatalogFields,
}

impl CsvShotCatalog {
    pub fn new(path: impl Into<PathBuf>, fields: CatalogFields) -> Self {
        Self {
            path: path.into(),
            fields,
        }
    }

    fn read(path: &Path, fields: &CatalogFields, campaign: &str) -> Result<Vec<ShotRecord>> {
        let catalog_err = |e: csv::Error| PrepError::CatalogError {
            message: format!("{:?}: {}", path, e),
        };

        let mut reader = csv::Reader::from_path(path).map_err(catalog_err)?;
        let headers = reader.headers().map_err(catalog_err)?.clone();

        let column = |name: &str| -> Result<usize> {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| PrepError::CatalogError {
                    message: format!("{:?} has no column {}", path, name),
                })
        };
        let shot_col = column(&fields.shot_id)?;
        let time_col = column(&fields.event_time)?;
        let value_col = column(&fields.event_value)?;
        let campaign_col = headers.iter().position(|h| h == fields.campaign);

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row.map_err(catalog_err)?;
            if let Some(col) = campaign_col {
                if row.get(col).map(str::trim) != Some(campaign) {
                    continue;
                }
            }

            let raw_shot = row.get(shot_col).unwrap_or("").trim();
            let shot_id = raw_shot.parse::<ShotId>().map_err(|e| PrepError::CatalogError {
                message: format!("bad shot id {:?}: {}", raw_shot, e),
            })?;

            records.push(ShotRecord {
                shot_id,
                event_time: parse_optional_f64(&fields.event_time, row.get(time_col).unwrap_or(""))?,
                event_value: parse_optional_f64(&fields.event_value, row.get(value_col).unwrap_or(""))?,
            });
        }

        Ok(records)
    }
}

impl ShotCatalog for CsvShotCatalog {
    async fn query(&self, campaign: &str) -> Result<Vec<ShotRecord>> {
        let path = self.path.clone();
        let fields = self.fields.clone();
        let campaign = campaign.to_string();

        let records = tokio::task::spawn_blocking(move || Self::read(&path, &fields, &campaign))
            .await
            .map_err(|e| PrepError::Internal {
                message: format!("catalog reader panicked: {}", e),
            })??;

        debug!("CSV catalog returned {} shots", records.len());
        Ok(records)
    }
}

/// Configuration for the HTTP catalog
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Base URL of the metadata service
    pub endpoint: String,
    /// Rows requested per page
    pub page_size: usize,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
    /// Field names
    pub fields: CatalogFields,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://mastapp.site".into(),
            page_size: 500,
            request_timeout_secs: 60,
            fields: CatalogFields::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogPage {
    items: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// Catalog backed by a paged JSON metadata service
pub struct HttpShotCatalog {
    client: Client,
    config: CatalogConfig,
}

impl HttpShotCatalog {
    pub fn new(config: CatalogConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PrepError::CatalogError {
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client, config })
    }

    /// GET request for one page; query values are percent-encoded
    fn page_request(&self, campaign: &str, page: usize) -> RequestBuilder {
        let url = format!("{}/json/shots", self.config.endpoint.trim_end_matches('/'));
        self.client.get(url).query(&[
            (format!("filters[{}][$eq]", self.config.fields.campaign), campaign.to_string()),
            ("page".to_string(), page.to_string()),
            ("size".to_string(), self.config.page_size.to_string()),
        ])
    }

    async fn fetch_page(&self, campaign: &str, page: usize) -> Result<CatalogPage> {
        let request = self
            .page_request(campaign, page)
            .build()
            .map_err(|e| PrepError::CatalogError {
                message: format!("Bad catalog request for campaign {:?}: {}", campaign, e),
            })?;
        let url = request.url().clone();

        let resp = self
            .client
            .execute(request)
            .await
            .map_err(|e| PrepError::CatalogError {
                message: format!("GET {} failed: {}", url, e),
            })?;

        if !resp.status().is_success() {
            return Err(PrepError::CatalogError {
                message: format!("GET {} failed: status {}", url, resp.status()),
            });
        }

        resp.json().await.map_err(|e| PrepError::CatalogError {
            message: format!("Bad catalog page from {}: {}", url, e),
        })
    }
}

/// Convert one JSON row into a record
pub fn record_from_json(
    fields: &CatalogFields,
    row: &serde_json::Map<String, serde_json::Value>,
) -> Result<ShotRecord> {
    let shot_id = row
        .get(&fields.shot_id)
        .and_then(serde_json::Value::as_u64)
        .and_then(|id| ShotId::try_from(id).ok())
        .ok_or_else(|| PrepError::CatalogError {
            message: format!("row without a valid {}: {:?}", fields.shot_id, row),
        })?;

    let number = |name: &str| row.get(name).and_then(serde_json::Value::as_f64);

    Ok(ShotRecord {
        shot_id,
        event_time: number(&fields.event_time),
        event_value: number(&fields.event_value),
    })
}

impl ShotCatalog for HttpShotCatalog {
    async fn query(&self, campaign: &str) -> Result<Vec<ShotRecord>> {
        let mut records = Vec::new();
        let mut page = 1;

        loop {
            let batch = self.fetch_page(campaign, page).await?;
            let count = batch.items.len();
            for row in &batch.items {
                records.push(record_from_json(&self.config.fields, row)?);
            }

            debug!("Catalog page {} returned {} rows", page, count);
            if count < self.config.page_size || count == 0 {
                break;
            }
            page += 1;
        }

        info!("Catalog returned {} shots for campaign {}", records.len(), campaign);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eligible_shots_drops_missing_time() {
        let records = vec![
            ShotRecord::new(101, Some(1.0), Some(0.5)),
            ShotRecord::new(102, Some(2.0), Some(0.7)),
            ShotRecord::new(103, None, Some(0.9)),
            ShotRecord::new(104, Some(f64::NAN), Some(0.9)),
        ];
        let kept = eligible_shots(records);
        let ids: Vec<ShotId> = kept.iter().map(|r| r.shot_id).collect();
        assert_eq!(ids, vec![101, 102]);
    }

    #[tokio::test]
    async fn test_csv_catalog_filters_campaign() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shots.csv");
        std::fs::write(
            &path,
            "shot_id,campaign,cpf_tvol_max,cpf_vol_max\n\
             101,M9,1.0,0.5\n\
             102,M9,,0.7\n\
             201,M8,0.3,0.1\n",
        )
        .unwrap();

        let catalog = CsvShotCatalog::new(&path, CatalogFields::default());
        let records = catalog.query("M9").await.unwrap();

        assert_eq!(
            records,
            vec![
                ShotRecord::new(101, Some(1.0), Some(0.5)),
                ShotRecord::new(102, None, Some(0.7)),
            ]
        );
    }

    #[test]
    fn test_record_from_json() {
        let fields = CatalogFields::default();
        let row = serde_json::json!({"shot_id": 30420, "cpf_tvol_max": 0.25, "cpf_vol_max": null});
        let record = record_from_json(&fields, row.as_object().unwrap()).unwrap();
        assert_eq!(record, ShotRecord::new(30420, Some(0.25), None));

        let bad = serde_json::json!({"cpf_tvol_max": 0.25});
        assert!(record_from_json(&fields, bad.as_object().unwrap()).is_err());
    }

    #[test]
    fn test_page_request_encodes_campaign() {
        let catalog = HttpShotCatalog::new(CatalogConfig {
            endpoint: "http://catalog.test/".into(),
            page_size: 50,
            ..CatalogConfig::default()
        })
        .unwrap();

        let request = catalog.page_request("M9 & size=1#x", 2).build().unwrap();
        let url = request.url();
        assert_eq!(url.path(), "/json/shots");
        assert_eq!(url.fragment(), None);

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("filters[campaign][$eq]".to_string(), "M9 & size=1#x".to_string()),
                ("page".to_string(), "2".to_string()),
                ("size".to_string(), "50".to_string()),
            ]
        );
    }
}
