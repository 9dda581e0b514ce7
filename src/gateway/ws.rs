//! Realtime channel. One websocket per client, fed by the event bus and
//! accepting a small inbound command set.

use super::state::AppState;
use crate::bus::Topic;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const MAX_DEVICE_ID_LEN: usize = 128;
const MAX_CAPABILITY_LEN: usize = 64;
const MAX_SCENE_ID_LEN: usize = 128;

#[derive(Deserialize)]
pub struct ConnectQuery {
    token: Option<String>,
}

/// `GET /ws` upgrade entry point. In production, the handshake is rejected
/// unless `token` matches the configured auth secret.
pub async fn upgrade(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if state.config.gateway.production {
        let expected = state.config.gateway.auth_secret.as_deref();
        let presented = query.token.as_deref();
        if expected.is_none() || presented != expected {
            return (axum::http::StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
enum InboundEvent {
    SubscribeDevice { device_id: String },
    ControlDevice { device_id: String, capability: String, value: serde_json::Value },
    ActivateScene { scene_id: String },
}

#[derive(Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
enum OutboundEvent {
    DeviceUpdated { payload: serde_json::Value },
    SceneActivated { payload: serde_json::Value },
    SecurityModeChanged { payload: serde_json::Value },
    EnergyUpdate { payload: serde_json::Value },
    ErrorStorm { payload: serde_json::Value },
    CircuitOpen { payload: serde_json::Value },
    Error { message: String },
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<OutboundEvent>();

    // No unsubscribe exists on the bus yet, so this subscription outlives
    // the connection; acceptable at this scale but worth tightening if the
    // realtime surface grows past a handful of concurrent clients.
    for topic in [
        Topic::DeviceUpdated,
        Topic::SceneActivated,
        Topic::SecurityModeChanged,
        Topic::EnergyUpdate,
        Topic::ErrorStorm,
        Topic::CircuitOpen,
    ] {
        let tx = tx.clone();
        state.bus.subscribe(
            topic,
            "gateway-ws",
            Arc::new(move |topic, payload: &serde_json::Value| {
                let event = match topic {
                    Topic::DeviceUpdated => OutboundEvent::DeviceUpdated { payload: payload.clone() },
                    Topic::SceneActivated => OutboundEvent::SceneActivated { payload: payload.clone() },
                    Topic::SecurityModeChanged => OutboundEvent::SecurityModeChanged { payload: payload.clone() },
                    Topic::EnergyUpdate => OutboundEvent::EnergyUpdate { payload: payload.clone() },
                    Topic::ErrorStorm => OutboundEvent::ErrorStorm { payload: payload.clone() },
                    Topic::CircuitOpen => OutboundEvent::CircuitOpen { payload: payload.clone() },
                    _ => return Ok(()),
                };
                tx.send(event).map_err(|e| e.to_string())
            }),
        );
    }

    let mut forward_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Ok(text) = serde_json::to_string(&event) {
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut forward_task => break,
            message = receiver.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound(&state, &text, &tx).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    forward_task.abort();
}

async fn handle_inbound(
    state: &AppState,
    text: &str,
    tx: &tokio::sync::mpsc::UnboundedSender<OutboundEvent>,
) {
    let inbound: InboundEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            let _ = tx.send(OutboundEvent::Error { message: format!("malformed event: {e}") });
            return;
        }
    };

    match inbound {
        InboundEvent::SubscribeDevice { device_id } => {
            if device_id.len() > MAX_DEVICE_ID_LEN {
                let _ = tx.send(OutboundEvent::Error { message: "Invalid device ID".to_string() });
            }
            // Subscription is implicit: every connection already receives
            // every device-updated event: there is no per-device topic to
            // narrow to, so this just validates the id.
        }
        InboundEvent::ControlDevice { device_id, capability, value } => {
            if device_id.len() > MAX_DEVICE_ID_LEN || capability.len() > MAX_CAPABILITY_LEN {
                let _ = tx.send(OutboundEvent::Error { message: "Invalid device ID or capability".to_string() });
                return;
            }
            if let Err(e) = state.devices.set_capability(&device_id, &capability, value.clone()).await {
                state.errors.record_error("gateway-ws", &e);
                let _ = tx.send(OutboundEvent::Error { message: e.to_string() });
                return;
            }
            let failures = state.bus.publish(
                Topic::DeviceUpdated,
                serde_json::json!({ "device_id": device_id, "capability": capability, "value": value }),
            );
            crate::bus::record_delivery_failures(&state.errors, failures);
        }
        InboundEvent::ActivateScene { scene_id } => {
            if scene_id.len() > MAX_SCENE_ID_LEN {
                let _ = tx.send(OutboundEvent::Error { message: "Invalid scene ID".to_string() });
                return;
            }
            match state.devices.trigger_flow(&scene_id).await {
                Ok(()) => {
                    let failures = state.bus.publish(Topic::SceneActivated, serde_json::json!({ "scene_id": scene_id }));
                    crate::bus::record_delivery_failures(&state.errors, failures);
                }
                Err(e) => {
                    let _ = tx.send(OutboundEvent::Error { message: e.to_string() });
                }
            }
        }
    }
}
