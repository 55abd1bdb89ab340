//! Integration tests for the refinery-server health and metrics endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::Value;
use tower::ServiceExt;

use refinery_core::{Interval, LatestPriceEntry};
use refinery_engine::{
    Aggregator, Enricher, InMemoryDeadLetterSink, JsonVenueParser, Normalizer, Projector,
    TaxonomyClassifier, Topic, ValidationBounds,
};
use refinery_server::handlers::AppState;
use refinery_server::routes::create_router;
use refinery_storage::{in_memory_analytical_store, InMemoryHotCache, InMemoryReferenceStore};
use refinery_traits::{HotCache, ReferenceStore};

fn test_state() -> Arc<AppState> {
    let store = in_memory_analytical_store();
    let cache: Arc<dyn HotCache> = Arc::new(InMemoryHotCache::default());
    let reference: Arc<dyn ReferenceStore> = Arc::new(InMemoryReferenceStore::new());

    let mut normalizer = Normalizer::new(ValidationBounds::default(), 1_000);
    normalizer.register(Box::new(JsonVenueParser::new("nymex")));

    let enricher = Enricher::new(
        TaxonomyClassifier::new(vec![]),
        reference.clone(),
        cache.clone(),
        100,
        Duration::from_secs(30),
        Duration::from_secs(300),
        Duration::from_secs(60),
    );

    let aggregator = Aggregator::new(vec![Interval::ONE_MINUTE], 5_000, 60_000, 2_000);
    let latest_prices: Topic<LatestPriceEntry> = Topic::new("served.market.latest_prices.v1", 64);
    let projector = Projector::new(store.served.clone(), cache.clone(), Duration::from_secs(30), latest_prices.producer());

    let pipeline = Arc::new(refinery_server::PipelineHandle::new(
        normalizer,
        enricher,
        aggregator,
        projector,
        store.ticks.clone(),
        store.bars.clone(),
        store.curves.clone(),
        Arc::new(InMemoryDeadLetterSink::default()),
    ));

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .expect("install recorder");

    Arc::new(AppState {
        store,
        cache,
        reference,
        pipeline,
        prometheus,
    })
}

#[tokio::test]
async fn liveness_never_checks_dependencies() {
    let app = create_router(test_state());

    let request = Request::builder()
        .uri("/health/live")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "live");
}

#[tokio::test]
async fn readiness_reports_ok_when_dependencies_are_in_memory() {
    let app = create_router(test_state());

    let request = Request::builder()
        .uri("/health/ready")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert!(json["components"].as_array().unwrap().len() >= 3);
}

#[tokio::test]
async fn metrics_endpoint_renders_prometheus_text() {
    let app = create_router(test_state());

    let request = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.is_empty() || text.contains('#') || !text.contains('<'));
}
