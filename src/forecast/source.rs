//! Upstream forecast data source.
//!
//! The dashboard's data API answers `POST {"action":"get_dashboard_forecast",
//! "filters":{...}}` with `{"data":{"data":[rows],"summary":{...}}}`. Rows
//! come straight from Postgres, so numeric aggregates may arrive as strings
//! and DC ids as numbers; both are normalized here.

use crate::aggregation::ForecastPoint;
use crate::keys::FilterParams;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

pub const DASHBOARD_ACTION: &str = "get_dashboard_forecast";

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("forecast request failed")]
    Request(#[from] reqwest::Error),
    #[error("forecast service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("forecast response could not be decoded")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub min: Option<NaiveDate>,
    pub max: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ForecastSummary {
    pub total_records: u64,
    pub avg_forecast: Option<f64>,
    pub date_range: DateRange,
}

/// Daily rows plus summary for one filter set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardForecast {
    pub rows: Vec<ForecastPoint>,
    pub summary: ForecastSummary,
}

#[async_trait]
pub trait ForecastSource: Send + Sync {
    /// Fetch daily forecast rows matching `filters`.
    async fn fetch_dashboard(&self, filters: &FilterParams) -> Result<DashboardForecast, SourceError>;
}

/// [`ForecastSource`] backed by the dashboard's HTTP data API.
#[derive(Debug, Clone)]
pub struct HttpForecastSource {
    client: reqwest::Client,
    url: String,
}

impl HttpForecastSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ForecastSource for HttpForecastSource {
    async fn fetch_dashboard(&self, filters: &FilterParams) -> Result<DashboardForecast, SourceError> {
        let body = json!({ "action": DASHBOARD_ACTION, "filters": filters });
        let response = self.client.post(&self.url).json(&body).send().await?;

        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        let envelope: Envelope = serde_json::from_slice(&bytes)?;
        let rows: Vec<ForecastPoint> = envelope.data.data.into_iter().map(Into::into).collect();
        debug!(url = %self.url, rows = rows.len(), "forecast rows fetched");

        Ok(DashboardForecast {
            rows,
            summary: envelope.data.summary,
        })
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    data: DashboardPayload,
}

#[derive(Debug, Deserialize)]
struct DashboardPayload {
    #[serde(default)]
    data: Vec<UpstreamRow>,
    #[serde(default)]
    summary: ForecastSummary,
}

#[derive(Debug, Deserialize)]
struct UpstreamRow {
    business_date: NaiveDate,
    state: String,
    #[serde(default, deserialize_with = "opt_string")]
    dma_id: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    dc_id: Option<String>,
    #[serde(deserialize_with = "lenient_f64")]
    total_forecast: f64,
    #[serde(deserialize_with = "lenient_f64")]
    avg_forecast: f64,
    #[serde(deserialize_with = "lenient_u64")]
    location_count: u64,
}

impl From<UpstreamRow> for ForecastPoint {
    fn from(row: UpstreamRow) -> Self {
        ForecastPoint {
            business_date: row.business_date,
            state: row.state,
            dma_id: row.dma_id,
            dc_id: row.dc_id,
            total_forecast: row.total_forecast,
            avg_forecast: row.avg_forecast,
            location_count: row.location_count,
        }
    }
}

fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(de::Error::custom(format!("expected id, got {other}"))),
    }
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    match Value::deserialize(d)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| de::Error::custom("number out of range")),
        Value::String(s) => s.trim().parse().map_err(de::Error::custom),
        Value::Null => Ok(0.0),
        other => Err(de::Error::custom(format!("expected number, got {other}"))),
    }
}

fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    match Value::deserialize(d)? {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| de::Error::custom("expected a non-negative integer")),
        Value::String(s) => s.trim().parse().map_err(de::Error::custom),
        other => Err(de::Error::custom(format!("expected count, got {other}"))),
    }
}
