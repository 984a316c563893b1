// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `op.casil.get|reload` (spec §4.6, §4.3 D2).

use serde_json::Value;

use super::{require_admin, CommandResult};
use crate::casil::policy::{PolicySnapshot, PolicySnapshotSpec};
use crate::error::ArqonError;
use crate::session::Session;
use crate::state::GatewayState;

pub async fn dispatch(
    state: &GatewayState,
    session: &Session,
    command: &str,
    args: &Value,
) -> CommandResult {
    match command {
        "op.casil.get" => get(state).await,
        "op.casil.reload" => reload(state, session, args).await,
        _ => Err(ArqonError::ValidationError),
    }
}

async fn get(state: &GatewayState) -> CommandResult {
    let snapshot = state.casil_snapshot().await;
    Ok(serde_json::json!({
        "enabled": snapshot.enabled,
        "mode": snapshot.mode,
        "default_decision": snapshot.default_decision,
        "max_inspect_bytes": snapshot.max_inspect_bytes,
        "oversize_behavior": snapshot.oversize_behavior,
        "policy_count": snapshot.policies.len(),
    }))
}

/// Atomically install a new policy snapshot. On compile failure, the current
/// snapshot is left intact and `CASIL_RELOAD_REJECTED` is returned (§4.6).
async fn reload(state: &GatewayState, session: &Session, args: &Value) -> CommandResult {
    require_admin(session)?;
    let spec: PolicySnapshotSpec = serde_json::from_value(args.clone())
        .map_err(|_| ArqonError::ValidationError)?;
    match PolicySnapshot::compile(spec) {
        Ok(snapshot) => {
            let policy_count = snapshot.policies.len();
            state.install_casil_snapshot(snapshot).await;
            state.telemetry.emit(crate::telemetry::TelemetryEvent::PolicyReloaded { policy_count });
            Ok(serde_json::json!({ "reloaded": true, "policy_count": policy_count }))
        }
        Err(_) => Err(ArqonError::CasilReloadRejected),
    }
}
