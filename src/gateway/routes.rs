//! REST route handlers. No business logic lives here — each handler
//! validates its inputs, delegates to a subsystem, and shapes the response.

use super::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

const MAX_DEVICE_ID_LEN: usize = 128;
const MAX_CAPABILITY_LEN: usize = 64;
const MAX_SCENE_ID_LEN: usize = 128;

fn bad_request(message: impl Into<String>) -> axum::response::Response {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// `GET /health` — liveness. Always 200 once the process is up.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let summary = state.supervisor.get_summary();
    Json(serde_json::json!({
        "status": "ok",
        "uptime": state.started_at.elapsed().as_secs(),
        "modules": { "ready": summary.ready, "total": summary.module_count },
    }))
}

/// `GET /ready` — readiness, distinct from liveness: 503 until `load_all`
/// has completed.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    if state.supervisor.is_ready() {
        (StatusCode::OK, Json(serde_json::json!({ "ready": true }))).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({ "ready": false }))).into_response()
    }
}

/// `GET /metrics` — Prometheus text exposition. Internal-only.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        state.perf.render_prometheus(),
    )
}

/// `GET /api/stats` — perf + security snapshot. Internal-only.
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "perf": state.perf.snapshot(),
        "security_mode": state.security.mode(),
        "error_history_len": state.errors.history_len(),
    }))
}

/// `GET /api/dashboard` — device + zone snapshot. Falls back to demo data
/// (still 200) if the zone adapter call fails.
pub async fn dashboard(State(state): State<AppState>) -> impl IntoResponse {
    let devices = state.devices.devices();
    match state.devices.zones().await {
        Ok(zones) => Json(serde_json::json!({ "devices": devices, "zones": zones, "demo": false })).into_response(),
        Err(_) => {
            Json(serde_json::json!({ "devices": devices, "zones": {}, "demo": true })).into_response()
        }
    }
}

/// `GET /api/devices`.
pub async fn devices(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.devices.devices())
}

/// `GET /api/zones`.
pub async fn zones(State(state): State<AppState>) -> impl IntoResponse {
    match state.devices.zones().await {
        Ok(zones) => Json(zones).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": e.to_string() }))).into_response(),
    }
}

#[derive(Deserialize)]
pub struct CapabilityValueBody {
    value: serde_json::Value,
}

/// `POST /api/device/:deviceId/capability/:capability`.
pub async fn set_device_capability(
    State(state): State<AppState>,
    Path((device_id, capability)): Path<(String, String)>,
    Json(body): Json<CapabilityValueBody>,
) -> impl IntoResponse {
    if device_id.len() > MAX_DEVICE_ID_LEN {
        return bad_request("Invalid device ID");
    }
    if capability.len() > MAX_CAPABILITY_LEN {
        return bad_request("Invalid capability");
    }
    match state.devices.set_capability(&device_id, &capability, body.value).await {
        Ok(()) => Json(serde_json::json!({ "success": true })).into_response(),
        Err(e) => {
            state.errors.record_error("gateway", &e);
            (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
        }
    }
}

/// `POST /api/scene/:sceneId`.
pub async fn activate_scene(State(state): State<AppState>, Path(scene_id): Path<String>) -> impl IntoResponse {
    if scene_id.len() > MAX_SCENE_ID_LEN {
        return bad_request("Invalid scene ID");
    }
    match state.devices.trigger_flow(&scene_id).await {
        Ok(()) => {
            let failures = state.bus.publish(crate::bus::Topic::SceneActivated, serde_json::json!({ "scene_id": scene_id }));
            crate::bus::record_delivery_failures(&state.errors, failures);
            Json(serde_json::json!({ "success": true })).into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": e.to_string() }))).into_response(),
    }
}

/// `GET /api/energy`.
pub async fn energy_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.energy.snapshot())
}

/// `GET /api/energy/analytics`.
pub async fn energy_analytics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.energy.analytics())
}

/// `GET /api/security`.
pub async fn security_mode(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "mode": state.security.mode() }))
}

#[derive(Deserialize)]
pub struct SecurityModeBody {
    mode: String,
}

/// `POST /api/security/mode`.
pub async fn set_security_mode(State(state): State<AppState>, Json(body): Json<SecurityModeBody>) -> impl IntoResponse {
    match state.security.set_mode(&body.mode) {
        Ok(mode) => Json(serde_json::json!({ "success": true, "mode": mode })).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": e.to_string() }))).into_response(),
    }
}
