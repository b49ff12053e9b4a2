//! Paginated extraction from the upstream web services

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::config::ExtractConfig;
use crate::data::types::Row;
use crate::domain::profiles::{Profile, SourceDef};
use crate::utils::retry::{RetryPolicy, retry_async};

const API_KEY_HEADER: &str = "API-key";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Non-200 response ({status}) from {profile} service")]
    Status { profile: String, status: StatusCode },

    #[error("Unexpected response from {profile} service: {reason}")]
    Decode { profile: String, reason: String },

    #[error("Retry count exceeded ({attempts} attempts): {last}")]
    RetryExceeded { attempts: u32, last: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// One page of upstream rows; `data` is `None` once the source is exhausted
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractPage {
    pub data: Option<Vec<Row>>,
    pub next_cursor: u64,
}

impl ExtractPage {
    pub fn from_rows(rows: Vec<Row>, cursor: u64, chunk: u64) -> Self {
        Self {
            data: if rows.is_empty() { None } else { Some(rows) },
            next_cursor: cursor + chunk,
        }
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Fetch the page starting at `cursor`
    async fn extract(&self, profile: &Profile, cursor: u64) -> Result<ExtractPage, ExtractError>;
}

#[derive(Deserialize)]
struct RecordsResponse {
    #[serde(default)]
    records: Vec<Row>,
}

#[derive(Deserialize)]
struct Feature {
    #[serde(default)]
    attributes: Row,
}

#[derive(Deserialize)]
struct FeaturesResponse {
    #[serde(default)]
    features: Vec<Feature>,
}

/// reqwest-backed extractor for offset (`records`) and watermark (`features`) sources
pub struct HttpExtractor {
    client: reqwest::Client,
    config: ExtractConfig,
}

impl HttpExtractor {
    pub fn new(config: ExtractConfig) -> Result<Self, ExtractError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            headers.insert(
                API_KEY_HEADER,
                HeaderValue::from_str(key)
                    .map_err(|e| ExtractError::Config(format!("invalid API key: {}", e)))?,
            );
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ExtractError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.config.retry_limit,
            self.config.retry_interval,
            self.config.retry_backoff,
        )
    }

    async fn fetch_json(
        &self,
        profile: &Profile,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, ExtractError> {
        let resp = request.send().await?;
        if resp.status() != StatusCode::OK {
            tracing::info!(profile = %profile.id, status = %resp.status(), "Non-200 response, retrying");
            return Err(ExtractError::Status {
                profile: profile.id.clone(),
                status: resp.status(),
            });
        }
        Ok(resp.json::<Value>().await?)
    }

    async fn fetch_with_retry(
        &self,
        profile: &Profile,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, ExtractError> {
        retry_async(self.policy(), || {
            let request = request.try_clone();
            async move {
                match request {
                    Some(request) => self.fetch_json(profile, request).await,
                    None => Err(ExtractError::Config("request body is not clonable".into())),
                }
            }
        })
        .await
        .map_err(|(e, attempts)| ExtractError::RetryExceeded {
            attempts,
            last: e.to_string(),
        })
    }
}

/// Upstream field names requested from watermark sources
pub fn source_fields(profile: &Profile) -> Vec<String> {
    let id = profile.id_column();
    let mut fields: Vec<String> = Vec::new();
    for (column_id, column) in profile.base_columns() {
        if column_id == id {
            continue;
        }
        let names: Vec<&str> = match &column.concat {
            Some(concat) => concat.fields.iter().map(String::as_str).collect(),
            None => vec![column.source_field.as_str()],
        };
        for name in names {
            if !fields.iter().any(|f| f == name) {
                fields.push(name.to_string());
            }
        }
    }
    fields
}

fn decode<T: serde::de::DeserializeOwned>(profile: &Profile, value: Value) -> Result<T, ExtractError> {
    serde_json::from_value(value).map_err(|e| ExtractError::Decode {
        profile: profile.id.clone(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn extract(&self, profile: &Profile, cursor: u64) -> Result<ExtractPage, ExtractError> {
        match &profile.source {
            SourceDef::Offset { path } => {
                let chunk = self.config.chunk_size;
                let url = format!(
                    "{}/{}",
                    self.config.materialized_views_url.trim_end_matches('/'),
                    path
                );
                let request = self.client.get(&url).query(&[
                    ("p_limit", chunk.to_string()),
                    ("p_offset", cursor.to_string()),
                ]);
                let body: RecordsResponse =
                    decode(profile, self.fetch_with_retry(profile, request).await?)?;
                tracing::debug!(profile = %profile.id, cursor, rows = body.records.len(), "Extracted chunk");
                Ok(ExtractPage::from_rows(body.records, cursor, chunk))
            }
            SourceDef::Watermark => {
                let chunk = self.config.gis_chunk_size;
                let url = format!("{}/query", self.config.gis_url.trim_end_matches('/'));
                let request = self.client.get(&url).query(&[
                    ("f", "json".to_string()),
                    ("orderByFields", "objectid".to_string()),
                    ("returnGeometry", "false".to_string()),
                    ("outFields", source_fields(profile).join(",")),
                    ("resultRecordCount", chunk.to_string()),
                    ("where", format!("objectid >= {}", cursor)),
                ]);
                let body: FeaturesResponse =
                    decode(profile, self.fetch_with_retry(profile, request).await?)?;
                let rows: Vec<Row> = body.features.into_iter().map(|f| f.attributes).collect();
                tracing::debug!(profile = %profile.id, cursor, rows = rows.len(), "Extracted GIS chunk");
                Ok(ExtractPage::from_rows(rows, cursor, chunk))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::profiles::ProfileRegistry;

    #[test]
    fn test_empty_page_signals_exhaustion() {
        let page = ExtractPage::from_rows(Vec::new(), 10_000, 5_000);
        assert_eq!(page.data, None);
        assert_eq!(page.next_cursor, 15_000);
    }

    #[test]
    fn test_page_advances_by_chunk() {
        let mut row = Row::new();
        row.insert("state".into(), Value::from("TX"));
        let page = ExtractPage::from_rows(vec![row], 0, 5_000);
        assert_eq!(page.data.map(|d| d.len()), Some(1));
        assert_eq!(page.next_cursor, 5_000);
    }

    #[test]
    fn test_source_fields_follow_mappings() {
        let registry = ProfileRegistry::builtin().unwrap();
        let assessments = registry.get("assessments").unwrap();
        let fields = source_fields(assessments);
        assert!(fields.contains(&"assessmentunitidentifier".to_string()));
        assert!(fields.contains(&"orgtype".to_string()));
        assert!(!fields.contains(&"objectid".to_string()));
        assert!(!fields.contains(&"organizationdisplayname".to_string()));
        assert_eq!(
            fields.iter().filter(|f| *f == "organizationname").count(),
            1
        );
    }

    #[test]
    fn test_decode_records() {
        let registry = ProfileRegistry::builtin().unwrap();
        let sources = registry.get("sources").unwrap();
        let body: RecordsResponse = decode(
            sources,
            serde_json::json!({ "records": [{ "state": "TX" }], "hasMore": true }),
        )
        .unwrap();
        assert_eq!(body.records.len(), 1);

        let gis: FeaturesResponse = decode(
            sources,
            serde_json::json!({ "features": [{ "attributes": { "objectid": 1 } }] }),
        )
        .unwrap();
        assert_eq!(gis.features[0].attributes["objectid"], 1);
    }

    #[tokio::test]
    async fn test_http_extractor_builds() {
        let config = ExtractConfig {
            api_key: Some("abc".into()),
            ..Default::default()
        };
        assert!(HttpExtractor::new(config).is_ok());
    }
}
