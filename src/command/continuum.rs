// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `op.continuum.projector.*` — cross-projection idempotent apply with
//! stale-event rejection (spec §4.5, P8).

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tokio::sync::RwLock;

use super::{require_admin, string_field, CommandResult};
use crate::error::ArqonError;
use crate::history::HistoryEntry;
use crate::session::Session;
use crate::state::GatewayState;

/// Per-(room,channel) projector cursor: the newest `source_ts` applied and
/// the set of `event_id`s already coalesced (idempotency, P8).
#[derive(Default)]
struct ProjectorCursor {
    latest_source_ts: String,
    seen_event_ids: HashSet<String>,
}

#[derive(Default)]
pub struct ProjectorState {
    cursors: RwLock<HashMap<(String, String), ProjectorCursor>>,
}

impl ProjectorState {
    pub fn new() -> Self {
        Self::default()
    }
}

pub async fn dispatch(
    state: &GatewayState,
    session: &Session,
    command: &str,
    args: &Value,
) -> CommandResult {
    match command {
        "op.continuum.projector.apply" => apply(state, session, args).await,
        "op.continuum.projector.dlq_len" => dlq_len(state, session).await,
        _ => Err(ArqonError::ValidationError),
    }
}

async fn apply(state: &GatewayState, session: &Session, args: &Value) -> CommandResult {
    let event_id = string_field(args, "event_id")?;
    let room = string_field(args, "room")?;
    let channel = string_field(args, "channel")?;
    let source_ts = string_field(args, "source_ts")?;
    let payload = args.get("payload").cloned().unwrap_or(Value::Null);

    let key = (room.to_owned(), channel.to_owned());
    let mut cursors = state.continuum.cursors.write().await;
    let cursor = cursors.entry(key).or_default();

    if cursor.seen_event_ids.contains(event_id) {
        return Ok(serde_json::json!({ "applied": false, "idempotent": true }));
    }

    if !cursor.latest_source_ts.is_empty() && source_ts < cursor.latest_source_ts.as_str() {
        state.history.stale.stale_events.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        state
            .storage
            .dlq_push(HistoryEntry {
                tenant_id: session.tenant_id.clone(),
                room: room.to_owned(),
                channel: channel.to_owned(),
                sequence: 0,
                id: event_id.to_owned(),
                timestamp: source_ts.to_owned(),
                from: session.client_id.clone(),
                kind: "continuum_dlq".to_owned(),
                payload,
                vector_clock: None,
                redaction_mask: None,
            })
            .await;
        return Err(ArqonError::StaleEvent);
    }

    cursor.seen_event_ids.insert(event_id.to_owned());
    cursor.latest_source_ts = source_ts.to_owned();
    Ok(serde_json::json!({ "applied": true }))
}

async fn dlq_len(state: &GatewayState, session: &Session) -> CommandResult {
    require_admin(session)?;
    Ok(serde_json::json!({ "dlq_len": state.storage.dlq_len().await }))
}
