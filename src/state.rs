//! Shared state handed to every request handler.

use crate::forecast::ForecastService;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub forecast: Arc<ForecastService>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(forecast: Arc<ForecastService>) -> Self {
        Self {
            forecast,
            started_at: Instant::now(),
        }
    }
}
