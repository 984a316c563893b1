// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background slow-consumer sweep (§4.1). A session whose outbound queue has
//! stayed at its high-watermark past `slow_consumer_timeout_ms` is evicted,
//! mirroring the teacher's periodic health-check/eviction loop.

use std::sync::Arc;

use crate::state::GatewayState;
use crate::telemetry::TelemetryEvent;

/// Spawn a single background task that periodically evicts slow consumers.
pub fn spawn_monitor(state: Arc<GatewayState>) {
    let interval = state.config.slow_consumer_timeout();
    let sweep_interval = (interval / 4).max(std::time::Duration::from_millis(100));

    tokio::spawn(async move {
        let mut timer = tokio::time::interval(sweep_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            for session in state.sessions.snapshot().await {
                if session.cancel.is_cancelled() {
                    continue;
                }
                let overflowing_since = *session.slow_consumer.overflowing_since.read().await;
                let Some(since) = overflowing_since else { continue };
                if since.elapsed() < state.config.slow_consumer_timeout() {
                    continue;
                }

                tracing::warn!(
                    session_id = %session.session_id,
                    tenant_id = %session.tenant_id,
                    "evicting slow consumer after sustained queue overflow"
                );
                state.telemetry.emit(TelemetryEvent::SlowConsumer {
                    session_id: session.session_id.clone(),
                });
                session.cancel.cancel();
            }
        }
    });
}
