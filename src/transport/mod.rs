// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the gateway (§4.1, §4.8, §6).

pub mod auth;
pub mod http;
pub mod telemetry_ws;
pub mod ws;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::GatewayState;

/// Build the client-facing router: the `/ws` upgrade plus the operational
/// HTTP surface described in spec §6.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(http::health))
        .route("/status", get(http::status))
        .route("/metrics", get(http::metrics))
        .route("/version", get(http::version))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Build the telemetry-only router: a single WebSocket endpoint broadcasting
/// `TelemetrySink` events, isolated on its own listener (§4.8).
pub fn build_telemetry_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/telemetry", get(telemetry_ws::telemetry_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
