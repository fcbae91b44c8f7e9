//! Forecast and cache-diagnostics handlers.

use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum_extra::extract::Query;
use serde::Serialize;
use tracing::{debug, info};

use crate::aggregation::AggregationLevel;
use crate::cache::CacheEntryStats;
use crate::forecast::{DataSource, ForecastView, QueryStats};
use crate::keys::{FilterParams, decode_key};
use crate::state::AppState;
use crate::web::error::ApiError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastResponse {
    pub key: String,
    pub source: DataSource,
    #[serde(flatten)]
    pub view: ForecastView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsResponse {
    pub size: usize,
    pub max_size: usize,
    pub ttl_ms: u128,
    pub pending_requests: usize,
    #[serde(flatten)]
    pub queries: QueryStats,
    pub entries: Vec<CacheEntryStats>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheKeyResponse {
    pub key: String,
    pub cached: bool,
    pub level: Option<AggregationLevel>,
    pub filters: FilterParams,
}

/// `GET /api/forecast`
///
/// Id lists are passed as repeated query keys: `?states=TX&states=CA`.
pub(super) async fn get_forecast(
    State(state): State<AppState>,
    Query(filters): Query<FilterParams>,
) -> Result<Response, ApiError> {
    let load = state.forecast.load(&filters).await?;
    debug!(key = %load.key, source = ?load.source, rows = load.view.data.len(), "forecast served");

    let cache_header = match load.source {
        DataSource::Cache => "hit",
        DataSource::Upstream => "miss",
    };
    let mut response = Json(ForecastResponse {
        key: load.key,
        source: load.source,
        view: load.view,
    })
    .into_response();
    response
        .headers_mut()
        .insert("x-cache", HeaderValue::from_static(cache_header));
    Ok(response)
}

/// `GET /api/forecast/cache`
pub(super) async fn cache_stats(State(state): State<AppState>) -> Json<CacheStatsResponse> {
    let cache = state.forecast.cache();
    let config = cache.config();
    let stats = cache.stats();
    Json(CacheStatsResponse {
        size: stats.size,
        max_size: config.max_size,
        ttl_ms: config.ttl.as_millis(),
        pending_requests: state.forecast.pending_requests(),
        queries: state.forecast.query_stats(),
        entries: stats.entries,
    })
}

/// `DELETE /api/forecast/cache`
pub(super) async fn clear_cache(State(state): State<AppState>) -> StatusCode {
    state.forecast.cache().clear();
    info!("forecast cache cleared via API");
    StatusCode::NO_CONTENT
}

/// `GET /api/forecast/cache/{key}`
///
/// Keys contain `/` and must be percent-encoded in the path.
pub(super) async fn describe_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<CacheKeyResponse>, ApiError> {
    let filters = decode_key(&key)?;
    let level = crate::forecast::select_level(&filters).ok();
    Ok(Json(CacheKeyResponse {
        cached: state.forecast.cache().contains(&key),
        key,
        level,
        filters,
    }))
}

/// `DELETE /api/forecast/cache/{key}`
pub(super) async fn remove_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> StatusCode {
    state.forecast.cache().remove(&key);
    StatusCode::NO_CONTENT
}
