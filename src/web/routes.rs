//! Web API router construction.

use axum::Router;
use axum::routing::get;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::web::error::{ApiError, ApiErrorCode};
use crate::web::{forecast, status};

/// Build the HTTP router.
///
/// `request_timeout` bounds whole requests, including a cold upstream fetch.
pub fn create_router(app_state: AppState, request_timeout: Duration) -> Router {
    let api_router = Router::new()
        .route("/health", get(status::health))
        .route("/forecast", get(forecast::get_forecast))
        .route(
            "/forecast/cache",
            get(forecast::cache_stats).delete(forecast::clear_cache),
        )
        .route(
            "/forecast/cache/{key}",
            get(forecast::describe_key).delete(forecast::remove_key),
        )
        .fallback(not_found)
        .with_state(app_state);

    Router::new().nest("/api", api_router).layer((
        TraceLayer::new_for_http(),
        CorsLayer::permissive(),
        TimeoutLayer::new(request_timeout),
    ))
}

async fn not_found() -> ApiError {
    ApiError::new(ApiErrorCode::NotFound, "No such API route")
}
