//! Forecast loading pipeline: tier selection, cache lookup, deduplicated fetch.

pub mod source;

use crate::aggregation::{
    AggregationLevel, ForecastPoint, aggregate, determine_aggregation_level, parse_iso_date,
};
use crate::cache::ForecastCache;
use crate::dedup::RequestDeduplicator;
use crate::keys::{FilterParams, build_key};
use crate::utils::log_if_slow;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub use source::{DashboardForecast, ForecastSource, ForecastSummary, HttpForecastSource, SourceError};

/// Endpoint name folded into deduplication keys.
const DASHBOARD_ENDPOINT: &str = "dashboard-forecast";
const SLOW_FETCH: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ForecastError {
    #[error("invalid filters: {0}")]
    InvalidFilters(String),
    #[error("upstream forecast request failed: {0}")]
    Upstream(String),
}

impl From<tokio::task::JoinError> for ForecastError {
    fn from(e: tokio::task::JoinError) -> Self {
        ForecastError::Upstream(format!("forecast fetch task failed: {e}"))
    }
}

/// The cached, pre-aggregated result for one filter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastView {
    pub level: AggregationLevel,
    pub data: Vec<ForecastPoint>,
    pub summary: ForecastSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Cache,
    Upstream,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastLoad {
    pub key: String,
    pub source: DataSource,
    pub view: ForecastView,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreloadReport {
    pub loaded: usize,
    pub already_cached: usize,
    pub failed: usize,
}

/// Cache hit and miss counts for `load` since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStats {
    pub hits: u64,
    pub misses: u64,
    pub total_queries: u64,
    /// `hits / total_queries`, or 0 before the first query.
    pub hit_rate: f64,
}

pub struct ForecastService {
    cache: Arc<ForecastCache>,
    dedup: RequestDeduplicator<ForecastView, ForecastError>,
    source: Arc<dyn ForecastSource>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ForecastService {
    pub fn new(cache: Arc<ForecastCache>, source: Arc<dyn ForecastSource>) -> Self {
        Self {
            cache,
            dedup: RequestDeduplicator::new(),
            source,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn cache(&self) -> &ForecastCache {
        &self.cache
    }

    /// Number of upstream fetches currently in flight.
    pub fn pending_requests(&self) -> usize {
        self.dedup.len()
    }

    pub fn query_stats(&self) -> QueryStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total_queries = hits + misses;
        QueryStats {
            hits,
            misses,
            total_queries,
            hit_rate: if total_queries == 0 {
                0.0
            } else {
                hits as f64 / total_queries as f64
            },
        }
    }

    /// Load the forecast view for `filters`, from cache when fresh.
    ///
    /// On a miss, concurrent callers with equivalent filters share a single
    /// upstream fetch; its aggregated result is cached before any of them
    /// return.
    pub async fn load(&self, filters: &FilterParams) -> Result<ForecastLoad, ForecastError> {
        let level = select_level(filters)?;
        let key = build_key(filters);

        if let Some(view) = self.cache.get::<ForecastView>(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(ForecastLoad {
                key,
                source: DataSource::Cache,
                view,
            });
        }

        self.misses.fetch_add(1, Ordering::Relaxed);

        let canonical = filters.canonical();
        let request_key = canonical.request_key(DASHBOARD_ENDPOINT);
        let source = Arc::clone(&self.source);
        let cache = Arc::clone(&self.cache);
        let cache_key = key.clone();

        let view = self
            .dedup
            .deduplicate(&request_key, move || async move {
                let start = Instant::now();
                let forecast = source.fetch_dashboard(&canonical).await.map_err(|e| {
                    error!(error = ?e, key = %cache_key, "upstream forecast fetch failed");
                    ForecastError::Upstream(e.to_string())
                })?;
                log_if_slow(start, SLOW_FETCH, "upstream forecast fetch");

                let raw_rows = forecast.rows.len();
                let view = ForecastView {
                    level,
                    data: aggregate(forecast.rows, level),
                    summary: forecast.summary,
                };
                debug!(
                    key = %cache_key,
                    level = %level,
                    raw_rows,
                    rows = view.data.len(),
                    "forecast aggregated"
                );

                cache.set(&cache_key, &view);
                Ok(view)
            })
            .await?;

        Ok(ForecastLoad {
            key,
            source: DataSource::Upstream,
            view,
        })
    }

    /// Warm the cache with `views`, one at a time.
    ///
    /// Views already cached are skipped; failures are logged and do not stop
    /// the remaining views.
    pub async fn preload_common_views(&self, views: &[FilterParams]) -> PreloadReport {
        let mut report = PreloadReport::default();
        info!(views = views.len(), "preloading common views");

        for view in views {
            let key = build_key(view);
            if self.cache.get::<ForecastView>(&key).is_some() {
                report.already_cached += 1;
                continue;
            }

            match self.load(view).await {
                Ok(_) => report.loaded += 1,
                Err(e) => {
                    warn!(error = %e, states = ?view.states, "error preloading view");
                    report.failed += 1;
                }
            }
        }

        info!(
            loaded = report.loaded,
            already_cached = report.already_cached,
            failed = report.failed,
            "preload finished"
        );
        report
    }
}

/// Validate the filter contract and pick the aggregation tier.
///
/// A filter set without both dates asks for the full history and is treated
/// as the widest tier.
pub fn select_level(filters: &FilterParams) -> Result<AggregationLevel, ForecastError> {
    if filters.states.is_empty() {
        return Err(ForecastError::InvalidFilters(
            "at least one state is required".to_owned(),
        ));
    }

    if filters.start_date.is_empty() || filters.end_date.is_empty() {
        return Ok(AggregationLevel::Monthly);
    }

    let start = parse_iso_date(&filters.start_date)
        .map_err(|e| ForecastError::InvalidFilters(e.to_string()))?;
    let end = parse_iso_date(&filters.end_date)
        .map_err(|e| ForecastError::InvalidFilters(e.to_string()))?;
    if start > end {
        return Err(ForecastError::InvalidFilters(format!(
            "startDate {start} is after endDate {end}"
        )));
    }

    Ok(determine_aggregation_level(start, end))
}
