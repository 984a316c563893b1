// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! History ring & replay (C4, spec §3, §4.5).

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use tokio::sync::RwLock;

use crate::envelope::Envelope;

/// One entry in a channel's history ring (spec §3).
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub tenant_id: String,
    pub room: String,
    pub channel: String,
    pub sequence: u64,
    pub id: String,
    pub timestamp: String,
    pub from: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
    pub vector_clock: Option<std::collections::HashMap<String, u64>>,
    /// Set when CASIL applied `ALLOW_WITH_REDACTION`; the stored payload is
    /// already the redacted form.
    pub redaction_mask: Option<Vec<String>>,
}

impl HistoryEntry {
    pub fn from_envelope(envelope: &Envelope, redaction_mask: Option<Vec<String>>) -> Self {
        Self {
            tenant_id: envelope.tenant_id.clone(),
            room: envelope.room.clone(),
            channel: envelope.channel.clone(),
            sequence: envelope.sequence,
            id: envelope.id.clone(),
            timestamp: envelope.timestamp.clone(),
            from: envelope.from.clone(),
            kind: format!("{:?}", envelope.kind).to_lowercase(),
            payload: envelope.payload.clone(),
            vector_clock: envelope.vector_clock.clone(),
            redaction_mask,
        }
    }
}

/// FIFO ring for a single (tenant, room, channel). Eviction is FIFO once
/// `capacity` is reached (spec §3).
struct Ring {
    capacity: usize,
    entries: VecDeque<HistoryEntry>,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self { capacity, entries: VecDeque::with_capacity(capacity.min(64)) }
    }

    fn push(&mut self, entry: HistoryEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }
}

/// Counts of entries rejected by a projector as stale (§4.5).
#[derive(Default)]
pub struct StaleCounters {
    pub stale_events: std::sync::atomic::AtomicU64,
}

/// The bounded, ordered history store (C4).
pub struct HistoryRing {
    capacity: usize,
    rings: RwLock<HashMap<(String, String, String), Ring>>,
    pub stale: StaleCounters,
    /// Whether `metadata.casil` is persisted alongside history entries.
    /// Open question in spec §9, resolved here: defaults to persist (see
    /// DESIGN.md).
    pub persist_casil_metadata: bool,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            rings: RwLock::new(HashMap::new()),
            stale: StaleCounters::default(),
            persist_casil_metadata: true,
        }
    }

    fn key(tenant: &str, room: &str, channel: &str) -> (String, String, String) {
        (tenant.to_owned(), room.to_owned(), channel.to_owned())
    }

    /// Append an entry. Blocked envelopes must never reach this call (I4).
    pub async fn append(&self, entry: HistoryEntry) {
        let key = Self::key(&entry.tenant_id, &entry.room, &entry.channel);
        let mut rings = self.rings.write().await;
        rings.entry(key).or_insert_with(|| Ring::new(self.capacity)).push(entry);
    }

    /// `history.get` (§4.5). Non-admin callers must always pass a concrete
    /// `room`; enforcement of that rule lives in the command dispatcher (C5)
    /// since it is an authorization concern, not a storage concern.
    pub async fn get(
        &self,
        tenant_id: &str,
        room: &str,
        channel: Option<&str>,
        limit: usize,
        since_sequence: Option<u64>,
        since_ts: Option<&str>,
    ) -> Vec<HistoryEntry> {
        let rings = self.rings.read().await;
        let mut matched: Vec<&HistoryEntry> = rings
            .iter()
            .filter(|((t, r, c), _)| {
                t == tenant_id && r == room && channel.map(|ch| ch == c).unwrap_or(true)
            })
            .flat_map(|(_, ring)| ring.entries.iter())
            .filter(|e| since_sequence.map(|s| e.sequence >= s).unwrap_or(true))
            .filter(|e| since_ts.map(|ts| e.timestamp.as_str() >= ts).unwrap_or(true))
            .collect();
        matched.sort_by_key(|e| e.sequence);
        let start = matched.len().saturating_sub(limit);
        matched[start..].iter().map(|e| (*e).clone()).collect()
    }

    /// `history.replay` (§4.5). Inclusive bounds on both ends; `dry_run`
    /// returns only the computed [`ReplaySummary`].
    pub async fn replay(
        &self,
        tenant_id: &str,
        room: &str,
        channel: Option<&str>,
        from_ts: &str,
        to_ts: &str,
    ) -> Vec<HistoryEntry> {
        let rings = self.rings.read().await;
        let mut matched: Vec<HistoryEntry> = rings
            .iter()
            .filter(|((t, r, c), _)| {
                t == tenant_id && r == room && channel.map(|ch| ch == c).unwrap_or(true)
            })
            .flat_map(|(_, ring)| ring.entries.iter())
            .filter(|e| e.timestamp.as_str() >= from_ts && e.timestamp.as_str() <= to_ts)
            .cloned()
            .collect();
        matched.sort_by_key(|e| e.sequence);
        matched
    }

    pub fn summarize(entries: &[HistoryEntry]) -> ReplaySummary {
        ReplaySummary {
            count: entries.len(),
            from_seq: entries.first().map(|e| e.sequence),
            to_seq: entries.last().map(|e| e.sequence),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    pub count: usize,
    pub from_seq: Option<u64>,
    pub to_seq: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seq: u64, ts: &str) -> HistoryEntry {
        HistoryEntry {
            tenant_id: "t1".into(),
            room: "r".into(),
            channel: "c".into(),
            sequence: seq,
            id: format!("arq_{seq}"),
            timestamp: ts.to_owned(),
            from: "alice".into(),
            kind: "event".into(),
            payload: serde_json::json!({}),
            vector_clock: None,
            redaction_mask: None,
        }
    }

    #[tokio::test]
    async fn ring_evicts_fifo_past_capacity() {
        let ring = HistoryRing::new(2);
        ring.append(entry(1, "t1")).await;
        ring.append(entry(2, "t2")).await;
        ring.append(entry(3, "t3")).await;
        let got = ring.get("t1", "r", Some("c"), 10, None, None).await;
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].sequence, 2);
        assert_eq!(got[1].sequence, 3);
    }

    #[tokio::test]
    async fn replay_bounds_are_inclusive_and_strict() {
        let ring = HistoryRing::new(500);
        for i in 1..=10u64 {
            ring.append(entry(i, &format!("t{i:02}"))).await;
        }
        let got = ring.replay("t1", "r", Some("c"), "t03", "t07").await;
        assert_eq!(got.len(), 5);
        assert_eq!(got.first().unwrap().sequence, 3);
        assert_eq!(got.last().unwrap().sequence, 7);

        let summary = HistoryRing::summarize(&got);
        assert_eq!(summary.count, 5);
        assert_eq!(summary.from_seq, Some(3));
        assert_eq!(summary.to_seq, Some(7));
    }

    #[tokio::test]
    async fn get_returns_ascending_sequence_order() {
        let ring = HistoryRing::new(500);
        for i in (1..=5u64).rev() {
            ring.append(entry(i, &format!("t{i:02}"))).await;
        }
        let got = ring.get("t1", "r", Some("c"), 10, None, None).await;
        let seqs: Vec<u64> = got.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }
}
