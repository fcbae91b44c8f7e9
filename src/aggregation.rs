//! Aggregation tier selection and roll-up of daily forecast rows.
//!
//! Wide date ranges are pre-aggregated before they leave the server so the
//! dashboard never has to draw (or download) a year of daily points. The tier
//! is a coarse policy keyed purely on the elapsed days between the two dates.

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Ranges up to this many elapsed days stay daily.
pub const DAILY_MAX_DAYS: i64 = 31;
/// Ranges up to this many elapsed days roll up to weeks; anything wider is monthly.
pub const WEEKLY_MAX_DAYS: i64 = 90;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AggregationError {
    #[error("invalid calendar date '{value}', expected YYYY-MM-DD")]
    InvalidDate { value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationLevel {
    Daily,
    Weekly,
    Monthly,
}

impl AggregationLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AggregationLevel::Daily => "daily",
            AggregationLevel::Weekly => "weekly",
            AggregationLevel::Monthly => "monthly",
        }
    }

    /// Select a tier from two ISO `YYYY-MM-DD` strings.
    pub fn for_range(start: &str, end: &str) -> Result<Self, AggregationError> {
        Ok(determine_aggregation_level(
            parse_iso_date(start)?,
            parse_iso_date(end)?,
        ))
    }

    /// First calendar day of the bucket containing `date`.
    ///
    /// Weekly buckets start on Monday (ISO weeks), monthly buckets on the 1st.
    pub fn bucket_start(self, date: NaiveDate) -> NaiveDate {
        match self {
            AggregationLevel::Daily => date,
            AggregationLevel::Weekly => {
                let offset = u64::from(date.weekday().num_days_from_monday());
                date.checked_sub_days(Days::new(offset)).unwrap_or(date)
            }
            AggregationLevel::Monthly => date.with_day(1).unwrap_or(date),
        }
    }
}

impl fmt::Display for AggregationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the aggregation tier for `[start, end]`.
///
/// Uses elapsed whole days, not calendar months. There is no ordering
/// requirement: an inverted range yields a negative span and stays daily.
pub fn determine_aggregation_level(start: NaiveDate, end: NaiveDate) -> AggregationLevel {
    let days_diff = (end - start).num_days();

    if days_diff <= DAILY_MAX_DAYS {
        AggregationLevel::Daily
    } else if days_diff <= WEEKLY_MAX_DAYS {
        AggregationLevel::Weekly
    } else {
        AggregationLevel::Monthly
    }
}

/// Parse a strict ISO calendar date.
pub fn parse_iso_date(value: &str) -> Result<NaiveDate, AggregationError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| AggregationError::InvalidDate {
        value: value.to_owned(),
    })
}

/// One forecast row, keyed by business date and location hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastPoint {
    pub business_date: NaiveDate,
    pub state: String,
    #[serde(default)]
    pub dma_id: Option<String>,
    #[serde(default)]
    pub dc_id: Option<String>,
    pub total_forecast: f64,
    pub avg_forecast: f64,
    pub location_count: u64,
}

type BucketKey = (NaiveDate, String, Option<String>, Option<String>);

/// Roll daily rows up to `level`.
///
/// Rows sharing a bucket and location are merged: totals and location counts
/// are summed, and the average is recomputed from the merged totals so it
/// stays weighted by location count. Output is ordered by bucket, then
/// state, DMA and DC.
pub fn aggregate(points: Vec<ForecastPoint>, level: AggregationLevel) -> Vec<ForecastPoint> {
    let mut buckets: BTreeMap<BucketKey, (f64, u64)> = BTreeMap::new();

    for point in points {
        let key = (
            level.bucket_start(point.business_date),
            point.state,
            point.dma_id,
            point.dc_id,
        );
        let slot = buckets.entry(key).or_insert((0.0, 0));
        slot.0 += point.total_forecast;
        slot.1 += point.location_count;
    }

    buckets
        .into_iter()
        .map(|((business_date, state, dma_id, dc_id), (total, count))| ForecastPoint {
            business_date,
            state,
            dma_id,
            dc_id,
            total_forecast: total,
            avg_forecast: if count == 0 { 0.0 } else { total / count as f64 },
            location_count: count,
        })
        .collect()
}
