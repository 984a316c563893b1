// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client WebSocket handler (§2, §4.1, §4.2, §4.3, §4.4).
//!
//! One task per session (§5): a single `select!` loop multiplexes inbound
//! socket frames, outbound queue drains, heartbeat ticks, and cancellation.
//! No branch blocks on storage or CASIL I/O past the bounded classification
//! work described in §4.3.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{RawQuery, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::casil::{inspect, PolicyOutcome};
use crate::command;
use crate::envelope::{self, Envelope, EnvelopeType};
use crate::error::ArqonError;
use crate::history::HistoryEntry;
use crate::routing;
use crate::session::{self, ClientType, SendQueue, Session, SlowConsumerState};
use crate::state::GatewayState;
use crate::telemetry::TelemetryEvent;
use crate::transport::auth;

/// `GET /ws` — upgrade and authenticate (§4.1). Rejects pre-upgrade with
/// `401` on missing/invalid credentials per the wire contract (§6).
pub async fn ws_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match auth::authenticate(&headers, raw_query.as_deref().unwrap_or(""), &state.config.auth) {
        Ok(c) => c,
        Err(code) => {
            state.record_auth_rejected();
            return code.to_http_response("authentication failed").into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, claims))
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>, claims: session::Claims) {
    let tenant_id = claims.tenant_id.clone();
    let client_id = claims.sub.clone();
    let is_admin = session::role_is_admin(claims.role.as_deref());
    let client_type = claims.client_type.unwrap_or(ClientType::Human);
    let default_room_channel = Session::default_room_channel(&claims);

    let session = Arc::new(Session {
        session_id: envelope::generate_id(),
        tenant_id: tenant_id.clone(),
        client_id: client_id.clone(),
        client_type,
        is_admin,
        connected_at: Instant::now(),
        last_activity: tokio::sync::RwLock::new(Instant::now()),
        subscriptions: tokio::sync::RwLock::new(HashSet::new()),
        send_queue: SendQueue::new(state.config.send_queue_capacity),
        slow_consumer: SlowConsumerState::default(),
        missed_heartbeats: AtomicU32::new(0),
        rate_limit_tokens: AtomicU64::new(state.config.rate_limit_per_sec as u64),
        cancel: CancellationToken::new(),
    });

    state.sessions.insert(Arc::clone(&session)).await;
    state.routing.ensure_tenant_bootstrap(&tenant_id).await;

    if let Some((room, channel)) = &default_room_channel {
        if state.routing.subscribe(&tenant_id, room, channel, &session.session_id).await.is_ok() {
            session.subscriptions.write().await.insert((room.clone(), channel.clone()));
        }
    }

    state.telemetry.emit(TelemetryEvent::SessionOpened {
        session_id: session.session_id.clone(),
        tenant_id: tenant_id.clone(),
    });

    let welcome = serde_json::json!({
        "type": "system",
        "event": "welcome",
        "session_id": session.session_id,
        "tenant_id": tenant_id,
        "client_id": client_id,
        "sender": "arqonbus",
        "timestamp": envelope::now_rfc3339(),
    });
    session.send_queue.push(welcome, true);

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut heartbeat = tokio::time::interval(state.config.heartbeat_interval());
    let mut rate_refill = tokio::time::interval(std::time::Duration::from_secs(1));
    let mut close_reason = "closed";

    loop {
        tokio::select! {
            _ = session.cancel.cancelled() => {
                close_reason = if state.shutdown.is_cancelled() { "shutdown" } else { "slow_consumer" };
                break;
            }

            _ = heartbeat.tick() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    close_reason = "transport_error";
                    break;
                }
                let missed = session.missed_heartbeats.fetch_add(1, Ordering::Relaxed) + 1;
                if missed > state.config.heartbeat_miss_limit {
                    close_reason = "heartbeat_timeout";
                    break;
                }
            }

            _ = rate_refill.tick() => {
                session.rate_limit_tokens.store(state.config.rate_limit_per_sec as u64, Ordering::Relaxed);
            }

            outbound = session.send_queue.recv() => {
                if ws_tx.send(Message::Text(outbound.payload.to_string().into())).await.is_err() {
                    close_reason = "transport_error";
                    break;
                }
            }

            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        session.missed_heartbeats.store(0, Ordering::Relaxed);
                        *session.last_activity.write().await = Instant::now();
                        handle_inbound(&state, &session, text.as_bytes()).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        session.missed_heartbeats.store(0, Ordering::Relaxed);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        close_reason = "client_closed";
                        break;
                    }
                    Some(Err(_)) => {
                        close_reason = "transport_error";
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.sessions.remove(&session.session_id).await;
    state.routing.remove_session_everywhere(&tenant_id, &session.session_id).await;
    state.telemetry.emit(TelemetryEvent::SessionClosed {
        session_id: session.session_id.clone(),
        reason: close_reason.to_owned(),
    });
}

/// Decode, validate, inspect, and route one inbound frame (§2 control flow).
/// Every error path sends a structured `error` envelope back to the sender
/// and returns — the session is never closed for a protocol-level failure.
async fn handle_inbound(state: &GatewayState, session: &Arc<Session>, bytes: &[u8]) {
    let raw = match envelope::decode(bytes, state.config.max_message_size) {
        Ok(raw) => raw,
        Err(e) => {
            send_error(session, e.error_code(), None, None, None, e.message());
            return;
        }
    };

    if session.rate_limit_tokens.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |t| {
        if t == 0 { None } else { Some(t - 1) }
    }).is_err() {
        send_error(session, ArqonError::RateLimited, None, raw.room.as_deref(), raw.channel.as_deref(), "rate limit exceeded");
        return;
    }

    let request_id = raw.id.clone();
    let honor_client_id = true; // resolved open question (§9): honored within the recent-id window.
    let envelope = envelope::stamp(raw, session, &state.sequence, &state.dedup, &state.node_id, honor_client_id);

    match envelope.kind {
        EnvelopeType::Command => handle_command(state, session, envelope).await,
        EnvelopeType::Private => handle_private(state, session, envelope).await,
        _ => handle_broadcast(state, session, envelope, request_id).await,
    }
}

async fn handle_command(state: &GatewayState, session: &Arc<Session>, envelope: Envelope) {
    let request_id = envelope.id.clone();
    let room = envelope.room.clone();
    let channel = envelope.channel.clone();
    match command::execute(state, session, &envelope).await {
        Ok(payload) => {
            let response = serde_json::json!({
                "type": "command_response",
                "request_id": request_id,
                "command": envelope.command,
                "room": room,
                "channel": channel,
                "payload": payload,
                "sender": "arqonbus",
                "timestamp": envelope::now_rfc3339(),
            });
            session.send_queue.push(response, true);
        }
        Err(code) => {
            send_error(session, code, Some(&request_id), Some(&room), Some(&channel), code.as_str());
        }
    }
}

async fn handle_private(state: &GatewayState, _session: &Arc<Session>, envelope: Envelope) {
    let targets: Vec<String> = envelope
        .payload
        .get("to")
        .and_then(serde_json::Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
        .unwrap_or_default();

    let payload = serde_json::to_value(&envelope).unwrap_or(serde_json::Value::Null);
    routing::private_deliver(&state.sessions, &envelope.tenant_id, &targets, &payload).await;
}

/// `event`/`system`/`telemetry`/`error` envelopes: CASIL inspect, then
/// history write + fan-out (§2, §4.3, §4.4).
async fn handle_broadcast(
    state: &GatewayState,
    session: &Arc<Session>,
    mut envelope: Envelope,
    request_id: Option<String>,
) {
    let snapshot = state.casil_snapshot().await;
    let result = inspect(&envelope, &snapshot);

    if let Some(classification) = &result.classification {
        state.telemetry.emit(TelemetryEvent::CasilClassification {
            room: envelope.room.clone(),
            channel: envelope.channel.clone(),
            kind: format!("{:?}", classification.kind),
            risk_level: format!("{:?}", classification.risk_level),
        });
    }
    state.telemetry.emit(TelemetryEvent::CasilPolicyAction {
        room: envelope.room.clone(),
        channel: envelope.channel.clone(),
        outcome: format!("{:?}", result.outcome),
        reason_code: result.reason_code.clone(),
    });

    if result.outcome == PolicyOutcome::Block {
        let code = casil_error_for_reason(&result.reason_code);
        send_error(session, code, request_id.as_deref(), Some(&envelope.room), Some(&envelope.channel), result.reason_code.as_str());
        state.telemetry.emit(TelemetryEvent::EnvelopeRejected {
            error_code: code.as_str().to_owned(),
            room: envelope.room.clone(),
            channel: envelope.channel.clone(),
        });
        return;
    }

    let redaction_mask: Option<Vec<String>> = if result.outcome == PolicyOutcome::AllowWithRedaction {
        if let Some(redacted) = &result.redacted_payload {
            envelope.payload = redacted.clone();
        }
        Some(vec![result.reason_code.clone()])
    } else {
        None
    };

    if snapshot.metadata_exposure_flags.expose_metadata_to_clients {
        envelope.metadata = Some(serde_json::json!({
            "casil": { "outcome": format!("{:?}", result.outcome), "reason_code": result.reason_code },
        }));
    }

    state.telemetry.emit(TelemetryEvent::EnvelopeAccepted {
        envelope_id: envelope.id.clone(),
        room: envelope.room.clone(),
        channel: envelope.channel.clone(),
    });

    let persist_mask = if state.history.persist_casil_metadata { redaction_mask.clone() } else { None };
    state.history.append(HistoryEntry::from_envelope(&envelope, persist_mask)).await;
    state.telemetry.emit(TelemetryEvent::HistoryAppend {
        tenant_id: envelope.tenant_id.clone(),
        room: envelope.room.clone(),
        channel: envelope.channel.clone(),
        sequence: envelope.sequence,
    });

    let recipients = state.routing.recipients(&envelope.tenant_id, &envelope.room, &envelope.channel).await;
    let echo = envelope.payload.get("echo").and_then(serde_json::Value::as_bool).unwrap_or(false);
    let payload = serde_json::to_value(&envelope).unwrap_or(serde_json::Value::Null);
    routing::fanout(&state.sessions, recipients, &session.session_id, echo, &payload).await;
}

fn casil_error_for_reason(reason_code: &str) -> ArqonError {
    if reason_code == "CASIL_POLICY_OVERSIZE" {
        ArqonError::CasilPolicyOversize
    } else if reason_code.starts_with("CASIL_INTERNAL") {
        ArqonError::CasilInternalBlock
    } else {
        ArqonError::CasilPolicyBlockedSecret
    }
}

fn send_error(
    session: &Session,
    code: ArqonError,
    request_id: Option<&str>,
    room: Option<&str>,
    channel: Option<&str>,
    message: impl Into<String>,
) {
    let envelope = code.to_envelope(request_id, message, room, channel, None);
    session.send_queue.push(envelope, true);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn casil_reason_maps_oversize() {
        assert_eq!(casil_error_for_reason("CASIL_POLICY_OVERSIZE"), ArqonError::CasilPolicyOversize);
    }

    #[test]
    fn casil_reason_maps_internal() {
        assert_eq!(casil_error_for_reason("CASIL_INTERNAL_BLOCK"), ArqonError::CasilInternalBlock);
    }

    #[test]
    fn casil_reason_defaults_to_blocked_secret() {
        assert_eq!(casil_error_for_reason("CASIL_POLICY_BLOCKED_SECRET"), ArqonError::CasilPolicyBlockedSecret);
    }
}
