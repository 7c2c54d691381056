//! Integration tests for the plotter API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use plotter_lib::{
    health::{components, HealthRegistry, LastRun},
    models::RunContext,
    observability::PlotterMetrics,
    pipeline::RunReport,
};
use ri_plotter::api::{create_router, AppState};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = PlotterMetrics::new();
    let state = Arc::new(AppState::new(health_registry, metrics));
    let router = create_router(state.clone());

    (router, state)
}

async fn record_empty_run(state: &AppState) {
    let report = RunReport::new(&RunContext::new(Utc::now()));
    state
        .health_registry
        .record_run(LastRun::new(&report, "success"))
        .await;
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert!(health.get("last_run").is_none());
}

#[tokio::test]
async fn test_healthz_reports_last_run_summary() {
    let (app, state) = setup_test_app().await;
    record_empty_run(&state).await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["last_run"]["outcome"], "success");
    assert_eq!(health["last_run"]["accounts"], 0);
    assert_eq!(health["last_run"]["points_emitted"], 0);
    assert!(health["last_run"]["snapshot"].as_f64().is_some());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::EMITTER, "2 failure(s) in last run")
        .await;

    let (status, health) = get_json(app, "/healthz").await;

    // Partial failures keep the service operational
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
    assert_eq!(
        health["components"]["emitter"]["message"],
        "2 failure(s) in last run"
    );
}

#[tokio::test]
async fn test_healthz_returns_503_when_registry_unreadable() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::REGISTRY, "configs/awsaccount.yml: not found")
        .await;

    let (status, health) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_before_first_run() {
    let (app, _state) = setup_test_app().await;

    let (status, readiness) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state) = setup_test_app().await;
    record_empty_run(&state).await;

    let (status, readiness) = get_json(app, "/readyz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_readyz_returns_503_when_ready_but_unhealthy() {
    let (app, state) = setup_test_app().await;

    record_empty_run(&state).await;
    state
        .health_registry
        .set_unhealthy(components::BILLING, "Failed")
        .await;

    let (status, _) = get_json(app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, state) = setup_test_app().await;

    let report = RunReport::new(&RunContext::new(Utc::now()));
    state
        .metrics
        .observe_run(&Ok(report), Duration::from_millis(120));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("ri_plotter_runs_total"));
    assert!(metrics_text.contains("ri_plotter_run_duration_seconds_bucket"));
    assert!(metrics_text.contains("ri_plotter_points_emitted_total"));
    assert!(metrics_text.contains("ri_plotter_last_success_timestamp_seconds"));
}

#[tokio::test]
async fn test_healthz_includes_component_details() {
    let (app, _state) = setup_test_app().await;

    let (_, health) = get_json(app, "/healthz").await;

    assert!(health["components"].is_object());
    for name in components::ALL {
        assert!(health["components"][name].is_object(), "missing {}", name);
    }
}
