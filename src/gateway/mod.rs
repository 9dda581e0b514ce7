//! HTTP + realtime gateway: router assembly, middleware stack and handlers.

pub mod middleware;
pub mod routes;
pub mod state;
pub mod ws;

pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

/// Build the full router over `state`. `.layer()` wraps outside-in, so the
/// last call here is the first middleware a request passes through: CORS
/// sits outermost, then security headers, rate limiting, request
/// validation, request id tagging, and finally the perf tap closest to the
/// handler.
pub fn build_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state);

    let internal = Router::new()
        .route("/metrics", get(routes::metrics))
        .route("/api/stats", get(routes::stats))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::internal_only));

    let public = Router::new()
        .route("/health", get(routes::health))
        .route("/ready", get(routes::ready))
        .route("/api/dashboard", get(routes::dashboard))
        .route("/api/devices", get(routes::devices))
        .route("/api/zones", get(routes::zones))
        .route(
            "/api/device/:device_id/capability/:capability",
            post(routes::set_device_capability),
        )
        .route("/api/scene/:scene_id", post(routes::activate_scene))
        .route("/api/energy", get(routes::energy_snapshot))
        .route("/api/energy/analytics", get(routes::energy_analytics))
        .route("/api/security", get(routes::security_mode))
        .route("/api/security/mode", post(routes::set_security_mode))
        .route("/ws", get(ws::upgrade));

    Router::new()
        .merge(public)
        .merge(internal)
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::perf_tap))
        .layer(axum::middleware::from_fn(middleware::request_id))
        .layer(axum::middleware::from_fn(middleware::validate_request))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::rate_limit))
        .layer(axum::middleware::from_fn(middleware::security_headers))
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer(state: &AppState) -> CorsLayer {
    if state.config.gateway.allowed_origins.is_empty() {
        return CorsLayer::new();
    }
    let origins: Vec<axum::http::HeaderValue> = state
        .config
        .gateway
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}
