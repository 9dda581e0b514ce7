//! End-to-end gateway tests exercised over the router directly, without a
//! bound socket.

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use hearth::bus::EventBus;
use hearth::config::AppConfig;
use hearth::device::{DeviceCache, InMemoryDeviceManager};
use hearth::domain::energy::EnergyDomain;
use hearth::domain::security::SecurityDomain;
use hearth::error::ErrorMiddleware;
use hearth::gateway::{build_router, AppState};
use hearth::notifications::NotificationCenter;
use hearth::perf::PerfMonitor;
use hearth::pid::HeatingController;
use hearth::resilience::TokenBucket;
use hearth::rules::AutomationEngine;
use hearth::settings::InMemorySettingsStore;
use hearth::supervisor::{Supervisor, SystemClock};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tower::ServiceExt;

fn test_state() -> AppState {
    let config = Arc::new(AppConfig::default());
    let bus = Arc::new(EventBus::new());
    let errors = Arc::new(ErrorMiddleware::new());
    let notifications = Arc::new(NotificationCenter::new());
    let perf = Arc::new(PerfMonitor::new());
    let settings = Arc::new(InMemorySettingsStore::new()) as Arc<dyn hearth::settings::SettingsStore>;
    let devices = Arc::new(DeviceCache::new(Arc::new(InMemoryDeviceManager::new())));
    let pid = Arc::new(HeatingController::new(Some(devices.clone()), errors.clone()));
    let rules = Arc::new(AutomationEngine::new(Some(devices.clone()), notifications.clone(), errors.clone()));
    let energy = Arc::new(EnergyDomain::new(settings.clone(), config.domain.energy_tariff_sek_per_kwh));
    let security = Arc::new(SecurityDomain::new(bus.clone(), errors.clone()));
    let supervisor = Arc::new(Supervisor::new(bus.clone(), errors.clone(), Arc::new(SystemClock::new())));
    let rate_limiter = Arc::new(TokenBucket::new(config.gateway.rate_limit));

    AppState {
        config,
        devices,
        pid,
        rules,
        energy,
        security,
        perf,
        errors,
        notifications,
        bus,
        supervisor,
        rate_limiter,
        started_at: std::time::Instant::now(),
    }
}

fn client_ip() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)), 54321)
}

fn private_ip() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 54321)
}

fn with_connect_info(mut request: Request<Body>, addr: SocketAddr) -> Request<Body> {
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

#[tokio::test]
async fn health_is_always_ok() {
    let router = build_router(test_state());
    let request = with_connect_info(Request::builder().uri("/health").body(Body::empty()).unwrap(), client_ip());
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn ready_is_503_before_load_all() {
    let router = build_router(test_state());
    let request = with_connect_info(Request::builder().uri("/ready").body(Body::empty()).unwrap(), client_ip());
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn ready_is_200_after_load_all() {
    let state = test_state();
    state.supervisor.load_all(vec![]).await;
    let router = build_router(state);
    let request = with_connect_info(Request::builder().uri("/ready").body(Body::empty()).unwrap(), client_ip());
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn oversized_device_id_is_rejected_with_named_error() {
    let router = build_router(test_state());
    let oversized_id = "d".repeat(129);
    let request = with_connect_info(
        Request::builder()
            .method("POST")
            .uri(format!("/api/device/{oversized_id}/capability/onoff"))
            .header("content-type", "application/json")
            .body(Body::from(r#"{"value": true}"#))
            .unwrap(),
        client_ip(),
    );
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "Invalid device ID");
}

#[tokio::test]
async fn post_without_json_content_type_is_rejected() {
    let router = build_router(test_state());
    let request = with_connect_info(
        Request::builder()
            .method("POST")
            .uri("/api/security/mode")
            .header("content-type", "text/plain")
            .body(Body::from(r#"{"mode":"home"}"#))
            .unwrap(),
        client_ip(),
    );
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn unknown_security_mode_is_rejected() {
    let router = build_router(test_state());
    let request = with_connect_info(
        Request::builder()
            .method("POST")
            .uri("/api/security/mode")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"mode":"intruder-alert"}"#))
            .unwrap(),
        client_ip(),
    );
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn valid_security_mode_transition_succeeds() {
    let router = build_router(test_state());
    let request = with_connect_info(
        Request::builder()
            .method("POST")
            .uri("/api/security/mode")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"mode":"away"}"#))
            .unwrap(),
        client_ip(),
    );
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn metrics_is_forbidden_from_a_public_address() {
    let router = build_router(test_state());
    let request = with_connect_info(Request::builder().uri("/metrics").body(Body::empty()).unwrap(), client_ip());
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn metrics_is_admitted_from_loopback() {
    let router = build_router(test_state());
    let request = with_connect_info(Request::builder().uri("/metrics").body(Body::empty()).unwrap(), private_ip());
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn dashboard_reports_devices_and_zones() {
    let router = build_router(test_state());
    let request = with_connect_info(Request::builder().uri("/api/dashboard").body(Body::empty()).unwrap(), client_ip());
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["demo"], false);
}
