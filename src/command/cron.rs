// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `op.cron.*` operator family (spec §4.6).

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{require_admin, string_field, CommandResult};
use crate::error::ArqonError;
use crate::session::Session;
use crate::state::GatewayState;

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJob {
    pub job_id: String,
    pub schedule: String,
    pub command: String,
    pub scheduled_by: String,
}

#[derive(Default)]
pub struct CronRegistry {
    by_tenant: RwLock<HashMap<String, Vec<ScheduledJob>>>,
}

impl CronRegistry {
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
        "op.cron.schedule" => schedule(state, session, args).await,
        "op.cron.list" => list(state, session).await,
        "op.cron.cancel" => cancel(state, session, args).await,
        _ => Err(ArqonError::ValidationError),
    }
}

async fn schedule(state: &GatewayState, session: &Session, args: &Value) -> CommandResult {
    require_admin(session)?;
    let schedule = string_field(args, "schedule")?;
    let command = string_field(args, "command")?;
    let job_id = crate::envelope::generate_id();

    let job = ScheduledJob {
        job_id: job_id.clone(),
        schedule: schedule.to_owned(),
        command: command.to_owned(),
        scheduled_by: session.client_id.clone(),
    };
    state.cron.by_tenant.write().await.entry(session.tenant_id.clone()).or_default().push(job);
    Ok(serde_json::json!({ "job_id": job_id }))
}

async fn list(state: &GatewayState, session: &Session) -> CommandResult {
    let by_tenant = state.cron.by_tenant.read().await;
    let jobs = by_tenant.get(&session.tenant_id).cloned().unwrap_or_default();
    Ok(serde_json::json!({ "jobs": jobs }))
}

async fn cancel(state: &GatewayState, session: &Session, args: &Value) -> CommandResult {
    require_admin(session)?;
    let job_id = string_field(args, "job_id")?;
    let mut by_tenant = state.cron.by_tenant.write().await;
    if let Some(jobs) = by_tenant.get_mut(&session.tenant_id) {
        jobs.retain(|j| j.job_id != job_id);
    }
    Ok(serde_json::json!({ "cancelled": true }))
}
