// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `op.omega.*` — the Tier-Omega command surface (spec §4.6, §4.10).

use serde_json::Value;

use super::{optional_str, require_admin, string_field, CommandResult};
use crate::error::ArqonError;
use crate::session::Session;
use crate::state::GatewayState;
use crate::tier_omega::OmegaError;

fn map_err(err: OmegaError) -> ArqonError {
    match err {
        OmegaError::FeatureDisabled => ArqonError::FeatureDisabled,
        OmegaError::SubstrateLimitReached => ArqonError::ValidationError,
        OmegaError::SubstrateNotFound => ArqonError::ChannelNotFound,
    }
}

pub async fn dispatch(
    state: &GatewayState,
    session: &Session,
    command: &str,
    args: &Value,
) -> CommandResult {
    match command {
        "op.omega.register_substrate" => register_substrate(state, session, args).await,
        "op.omega.unregister_substrate" => unregister_substrate(state, session, args).await,
        "op.omega.list_substrates" => list_substrates(state).await,
        "op.omega.emit_event" => emit_event(state, session, args).await,
        "op.omega.list_events" => list_events(state, args).await,
        "op.omega.clear_events" => clear_events(state, session).await,
        _ => Err(ArqonError::ValidationError),
    }
}

async fn register_substrate(state: &GatewayState, session: &Session, args: &Value) -> CommandResult {
    require_admin(session)?;
    let substrate_id = string_field(args, "substrate_id")?;
    let metadata = args.get("metadata").cloned().unwrap_or(Value::Null);
    state
        .omega
        .register_substrate(substrate_id, &session.client_id, metadata)
        .await
        .map_err(map_err)?;
    Ok(serde_json::json!({ "registered": true }))
}

async fn unregister_substrate(state: &GatewayState, session: &Session, args: &Value) -> CommandResult {
    require_admin(session)?;
    let substrate_id = string_field(args, "substrate_id")?;
    state.omega.unregister_substrate(substrate_id).await.map_err(map_err)?;
    Ok(serde_json::json!({ "unregistered": true }))
}

async fn list_substrates(state: &GatewayState) -> CommandResult {
    let substrates = state.omega.list_substrates().await.map_err(map_err)?;
    Ok(serde_json::json!({ "substrates": substrates }))
}

async fn emit_event(state: &GatewayState, session: &Session, args: &Value) -> CommandResult {
    require_admin(session)?;
    let substrate_id = string_field(args, "substrate_id")?;
    let signal = string_field(args, "signal")?;
    let payload = args.get("payload").cloned().unwrap_or(Value::Null);
    state.omega.emit_event(substrate_id, signal, payload).await.map_err(map_err)?;
    Ok(serde_json::json!({ "emitted": true }))
}

async fn list_events(state: &GatewayState, args: &Value) -> CommandResult {
    let substrate_id = optional_str(args, "substrate_id");
    let signal = optional_str(args, "signal");
    let events = state.omega.list_events(substrate_id, signal).await.map_err(map_err)?;
    Ok(serde_json::json!({ "events": events }))
}

async fn clear_events(state: &GatewayState, session: &Session) -> CommandResult {
    require_admin(session)?;
    state.omega.clear_events().await.map_err(map_err)?;
    Ok(serde_json::json!({ "cleared": true }))
}
