// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tier-Omega isolated lane (C10, spec §4.10).
//!
//! Physically separated from C3/C4: substrates and events never enter the
//! routing graph or history rings. Feature-flagged off by default; when off
//! every operation returns `FEATURE_DISABLED`, including reads.

use std::collections::VecDeque;

use serde::Serialize;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize)]
pub struct Substrate {
    pub substrate_id: String,
    pub registered_by: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct OmegaEvent {
    pub substrate_id: String,
    pub signal: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OmegaError {
    FeatureDisabled,
    SubstrateLimitReached,
    SubstrateNotFound,
}

/// Bounded state for the lane (spec §3: default caps 128 substrates / 1000 events).
pub struct TierOmegaLane {
    enabled: bool,
    max_substrates: usize,
    max_events: usize,
    substrates: RwLock<Vec<Substrate>>,
    events: RwLock<VecDeque<OmegaEvent>>,
}

impl TierOmegaLane {
    pub fn new(enabled: bool, max_substrates: usize, max_events: usize) -> Self {
        Self {
            enabled,
            max_substrates,
            max_events,
            substrates: RwLock::new(Vec::new()),
            events: RwLock::new(VecDeque::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn register_substrate(
        &self,
        substrate_id: &str,
        registered_by: &str,
        metadata: serde_json::Value,
    ) -> Result<(), OmegaError> {
        if !self.enabled {
            return Err(OmegaError::FeatureDisabled);
        }
        let mut substrates = self.substrates.write().await;
        if substrates.len() >= self.max_substrates {
            return Err(OmegaError::SubstrateLimitReached);
        }
        substrates.retain(|s| s.substrate_id != substrate_id);
        substrates.push(Substrate {
            substrate_id: substrate_id.to_owned(),
            registered_by: registered_by.to_owned(),
            metadata,
        });
        Ok(())
    }

    pub async fn unregister_substrate(&self, substrate_id: &str) -> Result<(), OmegaError> {
        if !self.enabled {
            return Err(OmegaError::FeatureDisabled);
        }
        let mut substrates = self.substrates.write().await;
        let before = substrates.len();
        substrates.retain(|s| s.substrate_id != substrate_id);
        if substrates.len() == before {
            return Err(OmegaError::SubstrateNotFound);
        }
        Ok(())
    }

    pub async fn list_substrates(&self) -> Result<Vec<Substrate>, OmegaError> {
        if !self.enabled {
            return Err(OmegaError::FeatureDisabled);
        }
        Ok(self.substrates.read().await.clone())
    }

    pub async fn emit_event(
        &self,
        substrate_id: &str,
        signal: &str,
        payload: serde_json::Value,
    ) -> Result<(), OmegaError> {
        if !self.enabled {
            return Err(OmegaError::FeatureDisabled);
        }
        let mut events = self.events.write().await;
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(OmegaEvent {
            substrate_id: substrate_id.to_owned(),
            signal: signal.to_owned(),
            payload,
        });
        Ok(())
    }

    /// `op.omega.list_events`, with optional `substrate_id`/`signal` filters
    /// (spec §4.10).
    pub async fn list_events(
        &self,
        substrate_id: Option<&str>,
        signal: Option<&str>,
    ) -> Result<Vec<OmegaEvent>, OmegaError> {
        if !self.enabled {
            return Err(OmegaError::FeatureDisabled);
        }
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| substrate_id.map(|s| s == e.substrate_id).unwrap_or(true))
            .filter(|e| signal.map(|s| s == e.signal).unwrap_or(true))
            .cloned()
            .collect())
    }

    pub async fn clear_events(&self) -> Result<(), OmegaError> {
        if !self.enabled {
            return Err(OmegaError::FeatureDisabled);
        }
        self.events.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_lane_rejects_every_operation() {
        let lane = TierOmegaLane::new(false, 128, 1000);
        assert_eq!(
            lane.list_events(None, None).await.unwrap_err(),
            OmegaError::FeatureDisabled
        );
        assert_eq!(
            lane.register_substrate("s1", "admin", serde_json::json!({}))
                .await
                .unwrap_err(),
            OmegaError::FeatureDisabled
        );
    }

    #[tokio::test]
    async fn events_do_not_exceed_capacity() {
        let lane = TierOmegaLane::new(true, 128, 2);
        lane.emit_event("s1", "ping", serde_json::json!({})).await.unwrap();
        lane.emit_event("s1", "ping", serde_json::json!({})).await.unwrap();
        lane.emit_event("s1", "ping", serde_json::json!({})).await.unwrap();
        let events = lane.list_events(None, None).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn list_events_filters_by_substrate_and_signal() {
        let lane = TierOmegaLane::new(true, 128, 1000);
        lane.emit_event("s1", "ping", serde_json::json!({})).await.unwrap();
        lane.emit_event("s2", "pong", serde_json::json!({})).await.unwrap();
        let got = lane.list_events(Some("s1"), None).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].substrate_id, "s1");
    }

    #[tokio::test]
    async fn substrate_limit_is_enforced() {
        let lane = TierOmegaLane::new(true, 1, 1000);
        lane.register_substrate("s1", "admin", serde_json::json!({})).await.unwrap();
        let err = lane
            .register_substrate("s2", "admin", serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err, OmegaError::SubstrateLimitReached);
    }
}
