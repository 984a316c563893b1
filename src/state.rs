// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide gateway state. Composes every component behind a thin,
//! explicitly-passed context value (§9 redesign flag: no free-floating
//! global mutable state).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::casil::policy::{PolicySnapshot, PolicySnapshotSpec};
use crate::command::continuum::ProjectorState;
use crate::command::cron::CronRegistry;
use crate::command::store::OperatorStore;
use crate::command::webhook::WebhookRegistry;
use crate::config::GatewayConfig;
use crate::envelope::{RecentIdWindow, SequenceGenerator};
use crate::history::HistoryRing;
use crate::routing::RoutingFabric;
use crate::session::Session;
use crate::storage::StorageAdapter;
use crate::telemetry::TelemetrySink;
use crate::tier_omega::TierOmegaLane;

/// Live session table. The only owner of `Session` values (spec §3
/// "Ownership: C6 exclusively owns sessions").
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: Arc<Session>) {
        self.sessions.write().await.insert(session.session_id.clone(), session);
    }

    pub async fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.write().await.remove(session_id)
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn sessions_for_tenant(&self, tenant_id: &str) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Non-blocking enqueue onto a session's outbound queue (R3: a full or
    /// missing recipient is skipped, never awaited on). Fan-out/private
    /// delivery never evicts a session's own essential replies, only its
    /// other droppable entries (§4.1 part (a)). Tracks the high-watermark
    /// timestamp used by the slow-consumer sweep — set whenever an eviction
    /// was needed to make room, cleared on a clean insert (§4.1 parts (b)/(c)).
    pub async fn try_send(&self, session_id: &str, payload: serde_json::Value) -> bool {
        let session = match self.get(session_id).await {
            Some(s) => s,
            None => return false,
        };
        let outcome = session.send_queue.push(payload, false);
        if outcome.evicted || !outcome.inserted {
            let mut overflowing = session.slow_consumer.overflowing_since.write().await;
            overflowing.get_or_insert_with(std::time::Instant::now);
        } else {
            *session.slow_consumer.overflowing_since.write().await = None;
        }
        outcome.inserted
    }

    /// Drain-aware close used during graceful shutdown (§5 P9): every live
    /// session's cancellation token is tripped so in-flight reads/writes wind
    /// down within the configured drain window.
    pub async fn cancel_all(&self) {
        for session in self.sessions.read().await.values() {
            session.cancel.cancel();
        }
    }

    /// Snapshot of every live session, used by the slow-consumer sweep.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }
}

/// Process-wide context composing every component (§9 "Global mutable state"
/// redesign flag). Held behind an `Arc` and threaded explicitly through
/// handlers rather than accessed via statics.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub sessions: SessionRegistry,
    pub routing: RoutingFabric,
    pub history: HistoryRing,
    pub storage: StorageAdapter,
    pub telemetry: TelemetrySink,
    pub omega: TierOmegaLane,
    pub sequence: SequenceGenerator,
    pub dedup: RecentIdWindow,
    /// Atomically swappable CASIL snapshot (§4.3, §9). Readers clone the
    /// `Arc` once at the start of inspection so a reload mid-inspection
    /// never produces a torn read.
    casil_snapshot: RwLock<Arc<PolicySnapshot>>,
    pub webhooks: WebhookRegistry,
    pub cron: CronRegistry,
    pub operator_store: OperatorStore,
    pub continuum: ProjectorState,
    pub node_id: String,
    pub auth_rejected_total: AtomicU64,
    pub shutdown: CancellationToken,
}

impl GatewayState {
    pub async fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let storage = StorageAdapter::connect(&config.storage)
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        let omega = TierOmegaLane::new(
            config.omega.enabled,
            config.omega.max_substrates,
            config.omega.max_events,
        );
        let history = HistoryRing::new(config.history_capacity);
        let node_id = uuid::Uuid::new_v4().simple().to_string();

        // Preflight already validated that this spec compiles (§4.9), but we
        // don't rely on that ordering holding — fall back to the
        // conservative default rather than unwrap if it somehow doesn't.
        let casil_snapshot = match PolicySnapshot::compile(PolicySnapshotSpec::from_config(&config.casil)) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(error = %e, "configured CASIL snapshot failed to compile at startup, falling back to default-enforcing");
                PolicySnapshot::default_enforcing()
            }
        };

        Ok(Self {
            sessions: SessionRegistry::new(),
            routing: RoutingFabric::new(),
            history,
            storage,
            telemetry: TelemetrySink::default(),
            omega,
            sequence: SequenceGenerator::new(),
            dedup: RecentIdWindow::new(),
            casil_snapshot: RwLock::new(Arc::new(casil_snapshot)),
            webhooks: WebhookRegistry::new(),
            cron: CronRegistry::new(),
            operator_store: OperatorStore::new(),
            continuum: ProjectorState::new(),
            node_id,
            auth_rejected_total: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            config,
        })
    }

    pub async fn casil_snapshot(&self) -> Arc<PolicySnapshot> {
        self.casil_snapshot.read().await.clone()
    }

    /// Atomic snapshot swap installed by `op.casil.reload` (§4.6). The old
    /// snapshot remains valid for any inspection already holding a clone of
    /// it — readers never block a writer installing a new one.
    pub async fn install_casil_snapshot(&self, snapshot: PolicySnapshot) {
        *self.casil_snapshot.write().await = Arc::new(snapshot);
    }

    pub fn record_auth_rejected(&self) {
        self.auth_rejected_total.fetch_add(1, Ordering::Relaxed);
    }
}

/// Test-only helpers for building a minimal `GatewayState`, shared across
/// this crate's `#[cfg(test)]` modules.
#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::config::{
        AuthConfig, CasilConfig, OmegaConfig, Profile, StorageBackend, StorageConfig, StorageMode,
    };

    pub fn test_config() -> GatewayConfig {
        GatewayConfig {
            profile: Profile::Dev,
            host: "127.0.0.1".into(),
            port: 0,
            telemetry_port: 0,
            max_connections: 10,
            max_message_size: 1024,
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                mode: StorageMode::Strict,
                valkey_url: None,
                postgres_url: None,
            },
            auth: AuthConfig { enable_auth: false, jwt_secret: None, jwt_algorithm: "HS256".into() },
            casil: CasilConfig {
                enabled: true,
                mode: "enforce".into(),
                scope_include: "*".into(),
                scope_exclude: "".into(),
                max_inspect_bytes: 65_536,
                block_on_probable_secret: true,
                redaction_patterns: "".into(),
                default_decision: "block".into(),
            },
            omega: OmegaConfig { enabled: true, max_substrates: 8, max_events: 8 },
            history_capacity: 10,
            send_queue_capacity: 10,
            heartbeat_ms: 1000,
            heartbeat_miss_limit: 3,
            slow_consumer_timeout_ms: 1000,
            drain_ms: 100,
            rate_limit_per_sec: 100,
        }
    }

    pub async fn new_test_state() -> GatewayState {
        GatewayState::new(test_config()).await.expect("in-memory state must construct")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn casil_snapshot_swap_is_visible_immediately() {
        let config = test_support::test_config();
        let state = GatewayState::new(config).await.unwrap();
        let before = state.casil_snapshot().await;
        assert!(before.enabled);

        let mut replacement = PolicySnapshot::default_enforcing();
        replacement.enabled = false;
        state.install_casil_snapshot(replacement).await;
        let after = state.casil_snapshot().await;
        assert!(!after.enabled);
    }

    fn test_session(session_id: &str, queue_capacity: usize) -> Arc<Session> {
        Arc::new(Session {
            session_id: session_id.to_owned(),
            tenant_id: "tenant-a".into(),
            client_id: "client-a".into(),
            client_type: crate::session::ClientType::Human,
            is_admin: false,
            connected_at: std::time::Instant::now(),
            last_activity: RwLock::new(std::time::Instant::now()),
            subscriptions: RwLock::new(Default::default()),
            send_queue: crate::session::SendQueue::new(queue_capacity),
            slow_consumer: Default::default(),
            missed_heartbeats: std::sync::atomic::AtomicU32::new(0),
            rate_limit_tokens: AtomicU64::new(100),
            cancel: CancellationToken::new(),
        })
    }

    #[tokio::test]
    async fn try_send_marks_and_clears_overflow_watermark() {
        let registry = SessionRegistry::new();
        let session = test_session("sess-1", 1);
        registry.insert(Arc::clone(&session)).await;

        assert!(registry.try_send("sess-1", serde_json::json!({"n": 1})).await);
        assert!(session.slow_consumer.overflowing_since.read().await.is_none());

        // Queue capacity is 1 and the slot above is still unread, so this
        // send evicts the earlier entry to make room rather than failing —
        // but the eviction itself still marks the session as overflowing.
        assert!(registry.try_send("sess-1", serde_json::json!({"n": 2})).await);
        assert!(session.slow_consumer.overflowing_since.read().await.is_some());

        // Unrelated sessions never get marked.
        assert!(!registry.try_send("missing", serde_json::json!({"n": 3})).await);
    }

    #[tokio::test]
    async fn snapshot_reflects_inserted_sessions() {
        let registry = SessionRegistry::new();
        registry.insert(test_session("a", 4)).await;
        registry.insert(test_session("b", 4)).await;

        let ids: std::collections::HashSet<_> =
            registry.snapshot().await.into_iter().map(|s| s.session_id.clone()).collect();
        assert_eq!(ids, ["a".to_owned(), "b".to_owned()].into_iter().collect());
    }
}
