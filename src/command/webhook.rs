// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `op.webhook.*` operator family (spec §4.6).

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{optional_str, require_admin, string_field, CommandResult};
use crate::error::ArqonError;
use crate::session::Session;
use crate::state::GatewayState;

#[derive(Debug, Clone, Serialize)]
pub struct WebhookRegistration {
    pub webhook_id: String,
    pub url: String,
    pub events: Vec<String>,
    pub registered_by: String,
}

/// Tenant-scoped webhook registry. Not wired into `GatewayState` as its own
/// field — it piggybacks on the operator store's tenant-keyed shape (§6
/// "key-value space for operator store entries keyed by tenant") via a
/// dedicated in-memory table kept here for locality of the webhook family.
#[derive(Default)]
pub struct WebhookRegistry {
    by_tenant: RwLock<HashMap<String, Vec<WebhookRegistration>>>,
}

impl WebhookRegistry {
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
        "op.webhook.register" => register(state, session, args).await,
        "op.webhook.list" => list(state, session).await,
        "op.webhook.unregister" => unregister(state, session, args).await,
        _ => Err(ArqonError::ValidationError),
    }
}

async fn register(state: &GatewayState, session: &Session, args: &Value) -> CommandResult {
    require_admin(session)?;
    let url = string_field(args, "url")?;
    let events: Vec<String> = args
        .get("events")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
        .unwrap_or_default();
    let webhook_id = optional_str(args, "webhook_id")
        .map(str::to_owned)
        .unwrap_or_else(crate::envelope::generate_id);

    let registration = WebhookRegistration {
        webhook_id: webhook_id.clone(),
        url: url.to_owned(),
        events,
        registered_by: session.client_id.clone(),
    };

    let mut by_tenant = state.webhooks.by_tenant.write().await;
    by_tenant.entry(session.tenant_id.clone()).or_default().push(registration);
    Ok(serde_json::json!({ "webhook_id": webhook_id }))
}

async fn list(state: &GatewayState, session: &Session) -> CommandResult {
    let by_tenant = state.webhooks.by_tenant.read().await;
    let registrations = by_tenant.get(&session.tenant_id).cloned().unwrap_or_default();
    Ok(serde_json::json!({ "webhooks": registrations }))
}

async fn unregister(state: &GatewayState, session: &Session, args: &Value) -> CommandResult {
    require_admin(session)?;
    let webhook_id = string_field(args, "webhook_id")?;
    let mut by_tenant = state.webhooks.by_tenant.write().await;
    if let Some(list) = by_tenant.get_mut(&session.tenant_id) {
        list.retain(|w| w.webhook_id != webhook_id);
    }
    Ok(serde_json::json!({ "unregistered": true }))
}
