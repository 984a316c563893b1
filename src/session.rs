// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session/auth edge (C6, spec §3, §4.1).

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Instant;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::ArqonError;

/// Kind of client driving a session (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClientType {
    Human,
    AiAgent,
    Dashboard,
    Service,
}

/// JWT claims expected on the bearer token presented at handshake.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub tenant_id: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub client_type: Option<ClientType>,
    #[serde(default)]
    pub default_room: Option<String>,
    #[serde(default)]
    pub default_channel: Option<String>,
}

/// Slow-consumer backpressure state for a session (§4.1).
#[derive(Debug, Default)]
pub struct SlowConsumerState {
    /// Set when the send queue first hits its high-watermark; cleared once
    /// it drains. Session is closed if this persists past the configured
    /// timeout.
    pub overflowing_since: RwLock<Option<Instant>>,
}

/// One queued outbound message (§4.1). `essential` marks session-originated
/// replies (welcome, command responses, protocol errors) that the
/// drop-oldest policy below must never discard to make room.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub payload: serde_json::Value,
    pub essential: bool,
}

/// Bounded outbound delivery queue with a drop-oldest-non-essential
/// backpressure policy (§4.1 part (a)): when a session's queue is full, the
/// oldest non-essential entry is discarded to make room for the new one
/// rather than rejecting delivery outright. If every queued entry is
/// essential, the new message is rejected instead.
#[derive(Debug)]
pub struct SendQueue {
    capacity: usize,
    inner: StdMutex<VecDeque<QueuedMessage>>,
    notify: Notify,
}

/// Outcome of a [`SendQueue::push`], used by the caller to update
/// slow-consumer backpressure tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushOutcome {
    pub inserted: bool,
    pub evicted: bool,
}

impl SendQueue {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, inner: StdMutex::new(VecDeque::with_capacity(capacity)), notify: Notify::new() }
    }

    /// Enqueue a payload, evicting the oldest non-essential entry first if
    /// the queue is already at capacity. Returns whether the message was
    /// inserted and whether an eviction was needed to make room.
    pub fn push(&self, payload: serde_json::Value, essential: bool) -> PushOutcome {
        let mut queue = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut evicted = false;
        if queue.len() >= self.capacity {
            match queue.iter().position(|m| !m.essential) {
                Some(i) => {
                    queue.remove(i);
                    evicted = true;
                }
                None => return PushOutcome { inserted: false, evicted: false },
            }
        }
        queue.push_back(QueuedMessage { payload, essential });
        drop(queue);
        self.notify.notify_one();
        PushOutcome { inserted: true, evicted }
    }

    /// Wait for and pop the next queued message. Re-checks the queue before
    /// awaiting a notification, so this is safe to use as a `tokio::select!`
    /// branch even if cancelled mid-wait.
    pub async fn recv(&self) -> QueuedMessage {
        loop {
            let notified = self.notify.notified();
            {
                let mut queue = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(msg) = queue.pop_front() {
                    return msg;
                }
            }
            notified.await;
        }
    }
}

/// One authenticated, live connection (spec §3). Never persisted.
pub struct Session {
    pub session_id: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_type: ClientType,
    pub is_admin: bool,
    pub connected_at: Instant,
    pub last_activity: RwLock<Instant>,
    pub subscriptions: RwLock<HashSet<(String, String)>>,
    pub send_queue: SendQueue,
    pub slow_consumer: SlowConsumerState,
    pub missed_heartbeats: AtomicU32,
    pub rate_limit_tokens: AtomicU64,
    pub cancel: CancellationToken,
}

impl Session {
    pub fn default_room_channel(claims: &Claims) -> Option<(String, String)> {
        match (&claims.default_room, &claims.default_channel) {
            (Some(r), Some(c)) => Some((r.clone(), c.clone())),
            _ => None,
        }
    }
}

/// Verify a bearer JWT against the configured secret/algorithm (§4.1).
///
/// On any failure this returns `AuthInvalid` — the caller is responsible for
/// distinguishing "missing token" (`AuthRequired`) before calling this.
pub fn verify_token(token: &str, secret: &str, algorithm: &str) -> Result<Claims, ArqonError> {
    let alg = match algorithm {
        "HS256" => Algorithm::HS256,
        "HS384" => Algorithm::HS384,
        "HS512" => Algorithm::HS512,
        "RS256" => Algorithm::RS256,
        _ => return Err(ArqonError::AuthInvalid),
    };

    let key = match alg {
        Algorithm::RS256 => DecodingKey::from_rsa_pem(secret.as_bytes())
            .map_err(|_| ArqonError::AuthInvalid)?,
        _ => DecodingKey::from_secret(secret.as_bytes()),
    };

    let mut validation = Validation::new(alg);
    validation.validate_exp = true;

    jsonwebtoken::decode::<Claims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|_| ArqonError::AuthInvalid)
}

/// Extract a bearer token from an `Authorization` header value.
pub fn extract_bearer(header_value: &str) -> Option<&str> {
    header_value.strip_prefix("Bearer ")
}

/// Extract a bearer token from a WebSocket upgrade query string (`?token=...`).
pub fn extract_ws_token(query: &str) -> Option<String> {
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("token=") {
            return Some(value.to_owned());
        }
    }
    None
}

/// Whether a role claim grants admin authority (spec §3: "role (admin flag
/// derived from claims)").
pub fn role_is_admin(role: Option<&str>) -> bool {
    matches!(role, Some("admin") | Some("operator"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bearer_token() {
        assert_eq!(extract_bearer("Bearer abc123"), Some("abc123"));
        assert_eq!(extract_bearer("abc123"), None);
    }

    #[test]
    fn extracts_ws_query_token() {
        assert_eq!(extract_ws_token("sessions=all&token=xyz"), Some("xyz".to_owned()));
        assert_eq!(extract_ws_token("sessions=all"), None);
    }

    #[test]
    fn admin_role_recognized() {
        assert!(role_is_admin(Some("admin")));
        assert!(!role_is_admin(Some("user")));
        assert!(!role_is_admin(None));
    }

    #[test]
    fn send_queue_evicts_oldest_non_essential_when_full() {
        let queue = SendQueue::new(2);
        assert!(queue.push(serde_json::json!({"n": 1}), false).inserted);
        let second = queue.push(serde_json::json!({"n": 2}), false);
        assert!(second.inserted);
        assert!(!second.evicted);

        // Queue is now full of two droppable entries; a third push evicts
        // the oldest (n=1) to make room.
        let third = queue.push(serde_json::json!({"n": 3}), false);
        assert!(third.inserted);
        assert!(third.evicted);
    }

    #[test]
    fn send_queue_rejects_when_full_of_essential_entries() {
        let queue = SendQueue::new(1);
        assert!(queue.push(serde_json::json!({"kind": "welcome"}), true).inserted);
        let outcome = queue.push(serde_json::json!({"kind": "event"}), false);
        assert!(!outcome.inserted);
        assert!(!outcome.evicted);
    }

    #[tokio::test]
    async fn send_queue_recv_returns_items_in_fifo_order() {
        let queue = SendQueue::new(4);
        queue.push(serde_json::json!({"n": 1}), false);
        queue.push(serde_json::json!({"n": 2}), false);

        let first = queue.recv().await;
        let second = queue.recv().await;
        assert_eq!(first.payload["n"], 1);
        assert_eq!(second.payload["n"], 2);
    }

    #[tokio::test]
    async fn send_queue_recv_waits_for_a_push() {
        let queue = std::sync::Arc::new(SendQueue::new(4));
        let waiter = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.recv().await })
        };

        tokio::task::yield_now().await;
        queue.push(serde_json::json!({"n": 42}), true);
        let msg = waiter.await.expect("recv task must not panic");
        assert_eq!(msg.payload["n"], 42);
    }
}
