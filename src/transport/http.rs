// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operational HTTP surface (spec §6): liveness, status, metrics, version.
//! None of these require authentication — they carry no tenant data.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::state::GatewayState;

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn status(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let storage = state.storage.health().await;
    Json(serde_json::json!({
        "sessions": state.sessions.len().await,
        "storage": {
            "backend": format!("{:?}", storage.backend),
            "mode": format!("{:?}", storage.mode),
            "degraded": storage.degraded,
            "reachable": storage.reachable,
        },
        "omega_enabled": state.omega.is_enabled(),
        "auth_rejected_total": state.auth_rejected_total.load(Ordering::Relaxed),
        "telemetry_dropped_total": state.telemetry.dropped_count(),
        "node_id": state.node_id,
    }))
}

/// Prometheus text exposition (§6). Hand-rolled rather than pulling in a
/// metrics-registry crate, since the gateway only ever reports this fixed,
/// small set of gauges/counters.
pub async fn metrics(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let storage = state.storage.health().await;
    let mut body = String::new();
    body.push_str("# HELP arqonbus_sessions_active Currently connected sessions.\n");
    body.push_str("# TYPE arqonbus_sessions_active gauge\n");
    body.push_str(&format!("arqonbus_sessions_active {}\n", state.sessions.len().await));

    body.push_str("# HELP arqonbus_auth_rejected_total Rejected handshakes.\n");
    body.push_str("# TYPE arqonbus_auth_rejected_total counter\n");
    body.push_str(&format!(
        "arqonbus_auth_rejected_total {}\n",
        state.auth_rejected_total.load(Ordering::Relaxed)
    ));

    body.push_str("# HELP arqonbus_telemetry_dropped_total Telemetry events dropped under backpressure.\n");
    body.push_str("# TYPE arqonbus_telemetry_dropped_total counter\n");
    body.push_str(&format!("arqonbus_telemetry_dropped_total {}\n", state.telemetry.dropped_count()));

    body.push_str("# HELP arqonbus_storage_degraded Whether the storage backend is running degraded.\n");
    body.push_str("# TYPE arqonbus_storage_degraded gauge\n");
    body.push_str(&format!("arqonbus_storage_degraded {}\n", storage.degraded as u8));

    body.push_str("# HELP arqonbus_history_stale_events_total Events rejected as stale by a projector.\n");
    body.push_str("# TYPE arqonbus_history_stale_events_total counter\n");
    body.push_str(&format!(
        "arqonbus_history_stale_events_total {}\n",
        state.history.stale.stale_events.load(Ordering::Relaxed)
    ));

    ([("content-type", "text/plain; version=0.0.4")], body)
}

pub async fn version() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "arqonbus-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol_version": crate::envelope::PROTOCOL_VERSION,
    }))
}
