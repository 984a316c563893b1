// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `op.store.*` operator family — a tenant-scoped key-value space for
//! operator-managed entries (spec §4.6, §6).

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::RwLock;

use super::{require_admin, string_field, CommandResult};
use crate::error::ArqonError;
use crate::session::Session;
use crate::state::GatewayState;

#[derive(Default)]
pub struct OperatorStore {
    by_tenant: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl OperatorStore {
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
        "op.store.set" => set(state, session, args).await,
        "op.store.get" => get(state, session, args).await,
        "op.store.list" => list(state, session).await,
        "op.store.delete" => delete(state, session, args).await,
        _ => Err(ArqonError::ValidationError),
    }
}

async fn set(state: &GatewayState, session: &Session, args: &Value) -> CommandResult {
    require_admin(session)?;
    let key = string_field(args, "key")?;
    let value = args.get("value").cloned().unwrap_or(Value::Null);
    state
        .operator_store
        .by_tenant
        .write()
        .await
        .entry(session.tenant_id.clone())
        .or_default()
        .insert(key.to_owned(), value);
    Ok(serde_json::json!({ "set": true }))
}

async fn get(state: &GatewayState, session: &Session, args: &Value) -> CommandResult {
    let key = string_field(args, "key")?;
    let by_tenant = state.operator_store.by_tenant.read().await;
    let value = by_tenant.get(&session.tenant_id).and_then(|m| m.get(key)).cloned();
    Ok(serde_json::json!({ "key": key, "value": value }))
}

async fn list(state: &GatewayState, session: &Session) -> CommandResult {
    let by_tenant = state.operator_store.by_tenant.read().await;
    let keys: Vec<&String> = by_tenant.get(&session.tenant_id).map(|m| m.keys().collect()).unwrap_or_default();
    Ok(serde_json::json!({ "keys": keys }))
}

async fn delete(state: &GatewayState, session: &Session, args: &Value) -> CommandResult {
    require_admin(session)?;
    let key = string_field(args, "key")?;
    let mut by_tenant = state.operator_store.by_tenant.write().await;
    let removed = by_tenant.get_mut(&session.tenant_id).map(|m| m.remove(key).is_some()).unwrap_or(false);
    Ok(serde_json::json!({ "deleted": removed }))
}
