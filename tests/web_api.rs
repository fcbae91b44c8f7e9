//! HTTP API behaviour, driven through the router without a socket.

mod helpers;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use forecast_cache::keys::build_key;
use forecast_cache::state::AppState;
use forecast_cache::web::create_router;
use helpers::{FakeSource, filters, sample_rows, service};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn router(source: Arc<FakeSource>) -> Router {
    let state = AppState::new(Arc::new(service(source)));
    create_router(state, Duration::from_secs(5))
}

async fn send(router: &Router, method: Method, uri: &str) -> (StatusCode, Option<String>, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let cache_header = response
        .headers()
        .get("x-cache")
        .map(|v| v.to_str().unwrap().to_owned());
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, cache_header, body)
}

const TX_TWO_WEEKS: &str = "/api/forecast?states=TX&startDate=2025-01-01&endDate=2025-01-14";

#[tokio::test]
async fn health_reports_version() {
    let router = router(Arc::new(FakeSource::new(sample_rows())));
    let (status, _, body) = send(&router, Method::GET, "/api/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["cacheEntries"], 0);
}

#[tokio::test]
async fn forecast_miss_then_hit() {
    let source = Arc::new(FakeSource::new(sample_rows()));
    let router = router(source.clone());

    let (status, cache, body) = send(&router, Method::GET, TX_TWO_WEEKS).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache.as_deref(), Some("miss"));
    assert_eq!(body["source"], "upstream");
    assert_eq!(body["level"], "daily");
    assert_eq!(body["data"].as_array().unwrap().len(), 14);
    assert_eq!(body["data"][0]["businessDate"], "2025-01-01");
    assert_eq!(body["summary"]["totalRecords"], 14);

    let (status, cache, body) = send(&router, Method::GET, TX_TWO_WEEKS).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache.as_deref(), Some("hit"));
    assert_eq!(body["source"], "cache");
    assert_eq!(
        body["key"],
        build_key(&filters(&["TX"], "2025-01-01", "2025-01-14"))
    );
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn repeated_query_keys_select_multiple_states() {
    let source = Arc::new(FakeSource::new(sample_rows()));
    let router = router(source);

    let (status, _, body) = send(
        &router,
        Method::GET,
        "/api/forecast?states=TX&states=CA&startDate=2025-01-01&endDate=2025-01-01",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn missing_states_is_a_bad_request() {
    let source = Arc::new(FakeSource::new(sample_rows()));
    let router = router(source.clone());

    let (status, _, body) = send(&router, Method::GET, "/api/forecast?startDate=2025-01-01").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_FILTERS");
    assert_eq!(source.calls(), 0);
}

#[tokio::test]
async fn upstream_failure_maps_to_bad_gateway() {
    let source = Arc::new(FakeSource::new(sample_rows()).failing_for("TX"));
    let router = router(source);

    let (status, _, body) = send(&router, Method::GET, TX_TWO_WEEKS).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "UPSTREAM_FAILED");
    assert!(body["details"].as_str().unwrap().contains("500"));
}

// -- cache diagnostics --

#[tokio::test]
async fn cache_stats_list_entries() {
    let router = router(Arc::new(FakeSource::new(sample_rows())));
    send(&router, Method::GET, TX_TWO_WEEKS).await;
    send(&router, Method::GET, TX_TWO_WEEKS).await;

    let (status, _, body) = send(&router, Method::GET, "/api/forecast/cache").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["size"], 1);
    assert_eq!(body["hits"], 1);
    assert_eq!(body["misses"], 1);
    assert_eq!(body["totalQueries"], 2);
    assert_eq!(body["hitRate"], 0.5);
    assert_eq!(body["maxSize"], 10);
    assert_eq!(body["ttlMs"], 300_000);
    assert_eq!(body["pendingRequests"], 0);
    assert_eq!(
        body["entries"][0]["key"],
        build_key(&filters(&["TX"], "2025-01-01", "2025-01-14"))
    );
}

#[tokio::test]
async fn describe_and_remove_single_key() {
    let source = Arc::new(FakeSource::new(sample_rows()));
    let router = router(source.clone());
    send(&router, Method::GET, TX_TWO_WEEKS).await;

    let key = build_key(&filters(&["TX"], "2025-01-01", "2025-01-14"));
    let uri = format!("/api/forecast/cache/{}", urlencoding::encode(&key));

    let (status, _, body) = send(&router, Method::GET, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cached"], true);
    assert_eq!(body["level"], "daily");
    assert_eq!(body["filters"]["states"][0], "TX");
    assert_eq!(body["filters"]["endDate"], "2025-01-14");

    let (status, _, _) = send(&router, Method::DELETE, &uri).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, _, body) = send(&router, Method::GET, &uri).await;
    assert_eq!(body["cached"], false);

    let (_, cache, _) = send(&router, Method::GET, TX_TWO_WEEKS).await;
    assert_eq!(cache.as_deref(), Some("miss"));
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn describe_rejects_undecodable_key() {
    let router = router(Arc::new(FakeSource::new(sample_rows())));
    let (status, _, body) = send(&router, Method::GET, "/api/forecast/cache/not-a-key!").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_KEY");
}

#[tokio::test]
async fn clear_empties_the_cache() {
    let router = router(Arc::new(FakeSource::new(sample_rows())));
    send(&router, Method::GET, TX_TWO_WEEKS).await;

    let (status, _, _) = send(&router, Method::DELETE, "/api/forecast/cache").await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, _, body) = send(&router, Method::GET, "/api/forecast/cache").await;
    assert_eq!(body["size"], 0);
}

#[tokio::test]
async fn unknown_api_route_is_not_found() {
    let router = router(Arc::new(FakeSource::new(sample_rows())));
    let (status, _, body) = send(&router, Method::GET, "/api/forecasts").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}
