//! Shared fixtures for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use forecast_cache::aggregation::ForecastPoint;
use forecast_cache::cache::{CacheConfig, ForecastCache};
use forecast_cache::forecast::{
    DashboardForecast, ForecastService, ForecastSource, ForecastSummary, SourceError,
};
use forecast_cache::keys::FilterParams;
use forecast_cache::store::{KvStore, MemoryStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// In-process [`ForecastSource`] that counts fetches and returns canned rows.
pub struct FakeSource {
    calls: AtomicUsize,
    delay: Duration,
    /// States whose fetch fails with a 500.
    failing_states: Vec<String>,
    rows: Vec<ForecastPoint>,
}

impl FakeSource {
    pub fn new(rows: Vec<ForecastPoint>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            failing_states: Vec::new(),
            rows,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_for(mut self, state: &str) -> Self {
        self.failing_states.push(state.to_owned());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ForecastSource for FakeSource {
    async fn fetch_dashboard(
        &self,
        filters: &FilterParams,
    ) -> Result<DashboardForecast, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if filters
            .states
            .iter()
            .any(|s| self.failing_states.contains(s))
        {
            return Err(SourceError::Status {
                status: 500,
                body: "database unavailable".to_owned(),
            });
        }

        let rows: Vec<ForecastPoint> = self
            .rows
            .iter()
            .filter(|row| filters.states.contains(&row.state))
            .cloned()
            .collect();
        Ok(DashboardForecast {
            summary: ForecastSummary {
                total_records: rows.len() as u64,
                ..Default::default()
            },
            rows,
        })
    }
}

pub fn date(value: &str) -> NaiveDate {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap()
}

pub fn point(day: &str, state: &str, total: f64, locations: u64) -> ForecastPoint {
    ForecastPoint {
        business_date: date(day),
        state: state.to_owned(),
        dma_id: None,
        dc_id: None,
        total_forecast: total,
        avg_forecast: total / locations as f64,
        location_count: locations,
    }
}

/// Two weeks of daily Texas rows plus one California row.
pub fn sample_rows() -> Vec<ForecastPoint> {
    let mut rows: Vec<ForecastPoint> = (1..=14)
        .map(|day| point(&format!("2025-01-{day:02}"), "TX", 10.0, 2))
        .collect();
    rows.push(point("2025-01-01", "CA", 4.0, 1));
    rows
}

pub fn filters(states: &[&str], start: &str, end: &str) -> FilterParams {
    FilterParams {
        states: states.iter().map(|s| s.to_string()).collect(),
        start_date: start.to_owned(),
        end_date: end.to_owned(),
        ..Default::default()
    }
}

pub fn memory_cache() -> Arc<ForecastCache> {
    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    Arc::new(ForecastCache::new(store, CacheConfig::default()))
}

pub fn service(source: Arc<FakeSource>) -> ForecastService {
    ForecastService::new(memory_cache(), source)
}
