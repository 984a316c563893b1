// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Telemetry WebSocket endpoint (C8, spec §4.8) — a read-only stream of
//! `TelemetryEvent`s on its own listener, isolated from the client surface.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use crate::state::GatewayState;

pub async fn telemetry_handler(
    State(state): State<Arc<GatewayState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_telemetry_connection(state, socket))
}

async fn handle_telemetry_connection(state: Arc<GatewayState>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut rx = state.telemetry.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                let event = match event {
                    Ok(e) => e,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                };
                let Ok(json) = serde_json::to_string(&event) else { continue };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}
