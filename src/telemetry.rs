// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Telemetry sink (C8, spec §4.8).
//!
//! Non-blocking emission: every call is a `try_send` against a bounded
//! broadcast channel. Under backpressure, events are dropped and a counter
//! is bumped — telemetry must never stall the hot path (§5 P10).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "eventType", content = "payload")]
pub enum TelemetryEvent {
    CasilClassification { room: String, channel: String, kind: String, risk_level: String },
    CasilPolicyAction { room: String, channel: String, outcome: String, reason_code: String },
    SessionOpened { session_id: String, tenant_id: String },
    SessionClosed { session_id: String, reason: String },
    EnvelopeAccepted { envelope_id: String, room: String, channel: String },
    EnvelopeRejected { error_code: String, room: String, channel: String },
    RoutingDelivered { envelope_id: String, session_id: String },
    RoutingSkipped { envelope_id: String, session_id: String, reason: String },
    HistoryAppend { tenant_id: String, room: String, channel: String, sequence: u64 },
    HistoryRead { tenant_id: String, room: String, count: usize },
    StorageDegraded { backend: String },
    PolicyReloaded { policy_count: usize },
    TierOmegaEvent { substrate_id: String, signal: String },
    SlowConsumer { session_id: String },
}

/// Non-blocking telemetry sink. Backed by a bounded broadcast channel shared
/// with the telemetry WebSocket endpoint (§4.8, §6).
pub struct TelemetrySink {
    tx: broadcast::Sender<TelemetryEvent>,
    pub dropped: AtomicU64,
}

impl TelemetrySink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx, dropped: AtomicU64::new(0) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Never blocks; a lagging/absent receiver set simply
    /// means the event never reaches the dashboard, and is counted below so
    /// operators can see sink health without coupling ingress to it.
    pub fn emit(&self, event: TelemetryEvent) {
        if self.tx.send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for TelemetrySink {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_counts_as_dropped() {
        let sink = TelemetrySink::new(16);
        sink.emit(TelemetryEvent::SessionOpened { session_id: "s1".into(), tenant_id: "t1".into() });
        assert_eq!(sink.dropped_count(), 1);
    }

    #[test]
    fn emit_with_subscriber_is_delivered() {
        let sink = TelemetrySink::new(16);
        let mut rx = sink.subscribe();
        sink.emit(TelemetryEvent::SessionOpened { session_id: "s1".into(), tenant_id: "t1".into() });
        assert_eq!(sink.dropped_count(), 0);
        assert!(rx.try_recv().is_ok());
    }
}
