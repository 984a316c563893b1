// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command/operator dispatcher (C5, spec §4.6).
//!
//! A command envelope (`type="command"`) names one `command` from a closed
//! set. Each arm declares its own role requirement; unexpected panics never
//! escape `execute` — internal errors are caught at the boundary and mapped
//! to `INTERNAL_ERROR` with a correlation id.

pub mod casil_admin;
pub mod continuum;
pub mod cron;
pub mod omega;
pub mod store;
pub mod webhook;

use serde_json::Value;

use crate::envelope::Envelope;
use crate::error::ArqonError;
use crate::routing::ChannelType;
use crate::session::Session;
use crate::state::GatewayState;

/// Successful command result payload, becomes the `payload` of a
/// `command_response` envelope.
pub type CommandResult = Result<Value, ArqonError>;

fn require_admin(session: &Session) -> Result<(), ArqonError> {
    if session.is_admin {
        Ok(())
    } else {
        Err(ArqonError::AuthzDenied)
    }
}

fn string_field<'a>(args: &'a Value, name: &str) -> Result<&'a str, ArqonError> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ArqonError::ValidationError)
}

fn optional_str<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

fn optional_u64(args: &Value, name: &str) -> Option<u64> {
    args.get(name).and_then(Value::as_u64)
}

/// Dispatch a command envelope (§4.6 contract: `execute(command, args,
/// session) -> command_response | error`). Handlers return `Result` rather
/// than raising, so a well-behaved arm never panics (§4.6); a genuinely
/// unexpected failure surfaces as `INTERNAL_ERROR` from its own arm rather
/// than via a catch-all here.
pub async fn execute(
    state: &GatewayState,
    session: &Session,
    envelope: &Envelope,
) -> CommandResult {
    let command = envelope.command.as_deref().ok_or(ArqonError::ValidationError)?;
    dispatch(state, session, command, &envelope.payload).await
}

async fn dispatch(
    state: &GatewayState,
    session: &Session,
    command: &str,
    args: &Value,
) -> CommandResult {
    match command {
        "status" => status(state).await,
        "ping" => Ok(serde_json::json!({ "pong": true })),
        "history.get" => history_get(state, session, args).await,
        "history.replay" => history_replay(state, session, args).await,
        "create_channel" => create_channel(state, session, args).await,
        "delete_channel" => delete_channel(state, session, args).await,
        "join_channel" => join_channel(state, session, args).await,
        "leave_channel" => leave_channel(state, session, args).await,
        "list_channels" => list_channels(state, session, args).await,
        "channel_info" => channel_info(state, session, args).await,
        c if c.starts_with("op.webhook.") => webhook::dispatch(state, session, c, args).await,
        c if c.starts_with("op.cron.") => cron::dispatch(state, session, c, args).await,
        c if c.starts_with("op.store.") => store::dispatch(state, session, c, args).await,
        c if c.starts_with("op.casil.") => casil_admin::dispatch(state, session, c, args).await,
        c if c.starts_with("op.continuum.") => continuum::dispatch(state, session, c, args).await,
        c if c.starts_with("op.omega.") => omega::dispatch(state, session, c, args).await,
        _ => Err(ArqonError::ValidationError),
    }
}

async fn status(state: &GatewayState) -> CommandResult {
    Ok(serde_json::json!({
        "sessions": state.sessions.len().await,
        "storage_degraded": state.storage.is_degraded(),
        "omega_enabled": state.omega.is_enabled(),
        "telemetry_dropped": state.telemetry.dropped_count(),
    }))
}

/// `history.get` (§4.5). Non-admin callers must scope to a concrete room.
async fn history_get(state: &GatewayState, session: &Session, args: &Value) -> CommandResult {
    let room = optional_str(args, "room");
    if room.is_none() && !session.is_admin {
        return Err(ArqonError::AuthzDenied);
    }
    let room = room.unwrap_or_default();
    let channel = optional_str(args, "channel");
    let limit = optional_u64(args, "limit").unwrap_or(50) as usize;
    let since_sequence = optional_u64(args, "since_sequence");
    let since_ts = optional_str(args, "since_ts");

    let entries = state
        .history
        .get(&session.tenant_id, room, channel, limit, since_sequence, since_ts)
        .await;
    Ok(serde_json::json!({ "entries": entries }))
}

async fn history_replay(state: &GatewayState, session: &Session, args: &Value) -> CommandResult {
    let room = string_field(args, "room")?;
    let channel = optional_str(args, "channel");
    let from_ts = string_field(args, "from_ts")?;
    let to_ts = string_field(args, "to_ts")?;
    let dry_run = args.get("dry_run").and_then(Value::as_bool).unwrap_or(false);

    let entries = state.history.replay(&session.tenant_id, room, channel, from_ts, to_ts).await;
    let summary = crate::history::HistoryRing::summarize(&entries);
    if dry_run {
        Ok(serde_json::to_value(summary).unwrap_or(Value::Null))
    } else {
        Ok(serde_json::json!({ "entries": entries, "summary": summary }))
    }
}

async fn create_channel(state: &GatewayState, session: &Session, args: &Value) -> CommandResult {
    require_admin(session)?;
    let room = string_field(args, "room")?;
    let channel = string_field(args, "channel")?;
    let kind = match optional_str(args, "channel_type") {
        Some("private") => ChannelType::Private,
        Some("pm") => ChannelType::Pm,
        Some("system") => ChannelType::System,
        _ => ChannelType::General,
    };
    state
        .routing
        .create_channel(&session.tenant_id, room, channel, kind, &session.client_id)
        .await?;
    Ok(serde_json::json!({ "created": true, "room": room, "channel": channel }))
}

async fn delete_channel(state: &GatewayState, session: &Session, args: &Value) -> CommandResult {
    require_admin(session)?;
    let room = string_field(args, "room")?;
    let channel = string_field(args, "channel")?;
    state.routing.delete_channel(&session.tenant_id, room, channel).await?;
    Ok(serde_json::json!({ "deleted": true, "room": room, "channel": channel }))
}

async fn join_channel(state: &GatewayState, session: &Session, args: &Value) -> CommandResult {
    let room = string_field(args, "room")?;
    let channel = string_field(args, "channel")?;
    state.routing.subscribe(&session.tenant_id, room, channel, &session.session_id).await?;
    session.subscriptions.write().await.insert((room.to_owned(), channel.to_owned()));
    Ok(serde_json::json!({ "joined": true, "room": room, "channel": channel }))
}

async fn leave_channel(state: &GatewayState, session: &Session, args: &Value) -> CommandResult {
    let room = string_field(args, "room")?;
    let channel = string_field(args, "channel")?;
    state.routing.unsubscribe(&session.tenant_id, room, channel, &session.session_id).await;
    session.subscriptions.write().await.remove(&(room.to_owned(), channel.to_owned()));
    Ok(serde_json::json!({ "left": true, "room": room, "channel": channel }))
}

async fn list_channels(state: &GatewayState, session: &Session, args: &Value) -> CommandResult {
    let room = string_field(args, "room")?;
    let channels = state.routing.list_channels(&session.tenant_id, room).await;
    Ok(serde_json::json!({ "channels": channels }))
}

async fn channel_info(state: &GatewayState, session: &Session, args: &Value) -> CommandResult {
    let room = string_field(args, "room")?;
    let channel = string_field(args, "channel")?;
    match state.routing.channel_info(&session.tenant_id, room, channel).await {
        Some(info) => Ok(serde_json::to_value(info).unwrap_or(Value::Null)),
        None => Err(ArqonError::ChannelNotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ClientType, SendQueue};
    use std::sync::atomic::{AtomicU32, AtomicU64};
    use std::time::Instant;
    use tokio_util::sync::CancellationToken;

    fn test_session(tenant: &str, admin: bool) -> Session {
        Session {
            session_id: "s1".into(),
            tenant_id: tenant.into(),
            client_id: "alice".into(),
            client_type: ClientType::Human,
            is_admin: admin,
            connected_at: Instant::now(),
            last_activity: tokio::sync::RwLock::new(Instant::now()),
            subscriptions: tokio::sync::RwLock::new(Default::default()),
            send_queue: SendQueue::new(8),
            slow_consumer: Default::default(),
            missed_heartbeats: AtomicU32::new(0),
            rate_limit_tokens: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn non_admin_cannot_create_channel() {
        let state = crate::state::test_support::new_test_state().await;
        let session = test_session("t1", false);
        let args = serde_json::json!({ "room": "r", "channel": "c" });
        let err = create_channel(&state, &session, &args).await.unwrap_err();
        assert_eq!(err, ArqonError::AuthzDenied);
    }

    #[tokio::test]
    async fn non_admin_history_get_requires_room() {
        let state = crate::state::test_support::new_test_state().await;
        let session = test_session("t1", false);
        let args = serde_json::json!({});
        let err = history_get(&state, &session, &args).await.unwrap_err();
        assert_eq!(err, ArqonError::AuthzDenied);
    }

    #[tokio::test]
    async fn ping_returns_pong() {
        let state = crate::state::test_support::new_test_state().await;
        let result = dispatch(&state, &test_session("t1", false), "ping", &Value::Null)
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({ "pong": true }));
    }

    #[tokio::test]
    async fn join_then_list_channels_reflects_membership() {
        let state = crate::state::test_support::new_test_state().await;
        let session = test_session("t1", false);
        let args = serde_json::json!({ "room": "r", "channel": "c" });
        join_channel(&state, &session, &args).await.unwrap();
        let result = list_channels(&state, &session, &serde_json::json!({ "room": "r" }))
            .await
            .unwrap();
        assert_eq!(result["channels"].as_array().unwrap().len(), 1);
    }
}
