// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Envelope codec & validator (C1, spec §3, §4.2).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::session::Session;

pub const PROTOCOL_VERSION: &str = "1.0";
const SUPPORTED_VERSIONS: &[&str] = &["1.0"];
const RECENT_ID_WINDOW: usize = 4096;

/// Envelope types (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeType {
    Event,
    System,
    Private,
    Command,
    CommandResponse,
    Telemetry,
    Error,
}

/// The canonical wire envelope (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    pub room: String,
    pub channel: String,
    pub from: String,
    pub tenant_id: String,
    pub timestamp: String,
    pub sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_clock: Option<HashMap<String, u64>>,
    pub version: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<serde_json::Value>,
    /// Command name, only present on `command`/`command_response` envelopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Raw client-supplied envelope prior to server stamping. Every field is
/// optional/untrusted; `stamp` fills in or overwrites server-owned fields
/// per invariant I5.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEnvelope {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub room: Option<String>,
    pub channel: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub trace: Option<serde_json::Value>,
    #[serde(default)]
    pub vector_clock: Option<HashMap<String, u64>>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub echo: Option<bool>,
}

/// Errors raised while decoding/validating an inbound frame (§4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Malformed JSON or missing required field.
    BadShape(String),
    /// Unsupported `version`.
    UnsupportedProtocol(String),
    /// Payload exceeds `max_message_size`.
    Oversize { limit: usize, actual: usize },
}

impl ValidationError {
    pub fn error_code(&self) -> crate::error::ArqonError {
        match self {
            Self::BadShape(_) => crate::error::ArqonError::ValidationError,
            Self::UnsupportedProtocol(_) => crate::error::ArqonError::ProtocolError,
            Self::Oversize { .. } => crate::error::ArqonError::Oversize,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::BadShape(m) => m.clone(),
            Self::UnsupportedProtocol(v) => format!("unsupported protocol version {v}"),
            Self::Oversize { limit, actual } => {
                format!("payload of {actual} bytes exceeds limit of {limit}")
            }
        }
    }
}

const ROOM_CHANNEL_MAX_LEN: usize = 128;

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= ROOM_CHANNEL_MAX_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
}

/// Decode and validate a raw inbound JSON frame.
///
/// Does not stamp server-owned fields — call [`stamp`] afterwards.
pub fn decode(bytes: &[u8], max_message_size: usize) -> Result<RawEnvelope, ValidationError> {
    if bytes.len() > max_message_size {
        return Err(ValidationError::Oversize { limit: max_message_size, actual: bytes.len() });
    }
    let raw: RawEnvelope = serde_json::from_slice(bytes)
        .map_err(|e| ValidationError::BadShape(format!("invalid envelope JSON: {e}")))?;

    let version = raw.version.as_deref().unwrap_or(PROTOCOL_VERSION);
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(ValidationError::UnsupportedProtocol(version.to_owned()));
    }

    let room = raw.room.as_deref().unwrap_or("");
    let channel = raw.channel.as_deref().unwrap_or("");
    if !valid_name(room) {
        return Err(ValidationError::BadShape("invalid or missing `room`".into()));
    }
    if !valid_name(channel) {
        return Err(ValidationError::BadShape("invalid or missing `channel`".into()));
    }

    if let Some(kind) = &raw.kind {
        if parse_kind(kind).is_none() {
            return Err(ValidationError::BadShape(format!("unknown envelope type `{kind}`")));
        }
    }

    Ok(raw)
}

fn parse_kind(s: &str) -> Option<EnvelopeType> {
    Some(match s {
        "event" => EnvelopeType::Event,
        "system" => EnvelopeType::System,
        "private" => EnvelopeType::Private,
        "command" => EnvelopeType::Command,
        "command_response" => EnvelopeType::CommandResponse,
        "telemetry" => EnvelopeType::Telemetry,
        "error" => EnvelopeType::Error,
        _ => return None,
    })
}

/// Encode an envelope back to its canonical JSON wire form.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(envelope)
}

/// Current server time as RFC3339 UTC, second precision, matching the
/// `timestamp` field's documented shape.
pub fn now_rfc3339() -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    humantime_rfc3339(now.as_secs(), now.subsec_nanos())
}

/// Minimal RFC3339 formatter so the crate does not need a chrono dependency
/// for a single call site. `secs` is a Unix timestamp.
fn humantime_rfc3339(secs: u64, nanos: u32) -> String {
    // Days since epoch -> proleptic Gregorian date, then clock time. This
    // avoids pulling in a calendar crate for one formatting call.
    let days = secs / 86_400;
    let rem = secs % 86_400;
    let (h, m, s) = (rem / 3600, (rem % 3600) / 60, rem % 60);
    let (y, mo, d) = civil_from_days(days as i64);
    format!("{y:04}-{mo:02}-{d:02}T{h:02}:{m:02}:{s:02}.{millis:03}Z", millis = nanos / 1_000_000)
}

/// Howard Hinnant's civil_from_days algorithm (proleptic Gregorian).
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

/// Per-(tenant,room,channel) strictly increasing sequence generator (I2, §4.2).
#[derive(Default)]
pub struct SequenceGenerator {
    counters: Mutex<HashMap<(String, String, String), i64>>,
}

impl SequenceGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next sequence number for (tenant, room, channel).
    pub fn next(&self, tenant: &str, room: &str, channel: &str) -> u64 {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let key = (tenant.to_owned(), room.to_owned(), channel.to_owned());
        let entry = counters.entry(key).or_insert(0);
        *entry += 1;
        *entry as u64
    }
}

/// Bounded recent-id window for idempotent retries (open question in §9,
/// resolved in DESIGN.md: client ids are honored only within this window).
pub struct RecentIdWindow {
    seen: Mutex<(Vec<String>, std::collections::HashSet<String>)>,
}

impl Default for RecentIdWindow {
    fn default() -> Self {
        Self { seen: Mutex::new((Vec::new(), std::collections::HashSet::new())) }
    }
}

impl RecentIdWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `id` was already observed (i.e. this is a retry).
    /// Inserts `id` into the window as a side effect.
    pub fn observe(&self, id: &str) -> bool {
        let mut guard = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let (order, set) = &mut *guard;
        if set.contains(id) {
            return true;
        }
        set.insert(id.to_owned());
        order.push(id.to_owned());
        if order.len() > RECENT_ID_WINDOW {
            let evicted = order.remove(0);
            set.remove(&evicted);
        }
        false
    }
}

fn valid_client_id_shape(id: &str) -> bool {
    id.starts_with("arq_") && id.len() > 4 && id[4..].chars().all(|c| c.is_ascii_alphanumeric())
}

/// Server-side id generator, producing `arq_<ulid-like>` identifiers.
pub fn generate_id() -> String {
    format!("arq_{}", uuid::Uuid::new_v4().simple())
}

/// Stamp server-owned fields onto a validated raw envelope (§4.2, I5).
///
/// `dedup` tracks recently seen client-supplied ids for idempotent retries.
/// A client id is honored only if it has the `arq_` shape, has not been seen
/// in the recent window, and `honor_client_id` is true; otherwise the server
/// mints a fresh id.
pub fn stamp(
    raw: RawEnvelope,
    session: &Session,
    sequence: &SequenceGenerator,
    dedup: &RecentIdWindow,
    node_id: &str,
    honor_client_id: bool,
) -> Envelope {
    let room = raw.room.unwrap_or_default();
    let channel = raw.channel.unwrap_or_default();
    let kind = raw.kind.as_deref().and_then(parse_kind).unwrap_or(EnvelopeType::Event);

    let id = match &raw.id {
        Some(candidate)
            if honor_client_id
                && valid_client_id_shape(candidate)
                && !dedup.observe(candidate) =>
        {
            candidate.clone()
        }
        _ => generate_id(),
    };

    let mut vector_clock = raw.vector_clock.unwrap_or_default();
    *vector_clock.entry(node_id.to_owned()).or_insert(0) += 1;

    Envelope {
        id,
        kind,
        sequence: sequence.next(&session.tenant_id, &room, &channel),
        room,
        channel,
        from: session.client_id.clone(),
        tenant_id: session.tenant_id.clone(),
        timestamp: now_rfc3339(),
        vector_clock: Some(vector_clock),
        version: PROTOCOL_VERSION.to_owned(),
        payload: raw.payload,
        metadata: raw.metadata,
        trace: raw.trace,
        command: raw.command,
    }
}

/// A counter used only to namespace ids generated outside of a session
/// context (e.g. system-originated envelopes).
pub static SYSTEM_SEQUENCE: AtomicI64 = AtomicI64::new(0);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rejects_oversize_payload() {
        let body = vec![b'a'; 10];
        let err = decode(&body, 5).unwrap_err();
        assert!(matches!(err, ValidationError::Oversize { .. }));
    }

    #[test]
    fn rejects_unsupported_version() {
        let body = br#"{"room":"r","channel":"c","version":"9.9"}"#;
        let err = decode(body, 1024).unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedProtocol(_)));
    }

    #[test]
    fn rejects_missing_room() {
        let body = br#"{"channel":"c"}"#;
        let err = decode(body, 1024).unwrap_err();
        assert!(matches!(err, ValidationError::BadShape(_)));
    }

    #[test]
    fn sequence_is_monotonic_per_scope() {
        let gen = SequenceGenerator::new();
        assert_eq!(gen.next("t1", "r", "c"), 1);
        assert_eq!(gen.next("t1", "r", "c"), 2);
        assert_eq!(gen.next("t1", "r", "other"), 1);
        assert_eq!(gen.next("t2", "r", "c"), 1);
    }

    #[test]
    fn recent_id_window_detects_retry() {
        let window = RecentIdWindow::new();
        assert!(!window.observe("arq_abc"));
        assert!(window.observe("arq_abc"));
    }

    #[test]
    fn civil_date_round_trip_known_epoch() {
        // 2021-01-01T00:00:00Z == 1609459200
        assert_eq!(humantime_rfc3339(1_609_459_200, 0), "2021-01-01T00:00:00.000Z");
    }

    fn scope_key_strategy() -> impl Strategy<Value = (String, String, String)> {
        ("[a-z]{1,6}", "[a-z]{1,6}", "[a-z]{1,6}")
    }

    fn envelope_type_strategy() -> impl Strategy<Value = EnvelopeType> {
        prop_oneof![
            Just(EnvelopeType::Event),
            Just(EnvelopeType::System),
            Just(EnvelopeType::Private),
            Just(EnvelopeType::Command),
            Just(EnvelopeType::CommandResponse),
            Just(EnvelopeType::Telemetry),
            Just(EnvelopeType::Error),
        ]
    }

    fn envelope_strategy() -> impl Strategy<Value = Envelope> {
        (
            "arq_[a-z0-9]{8,16}",
            envelope_type_strategy(),
            "[a-z]{1,12}",
            "[a-z]{1,12}",
            "[a-z]{1,12}",
            "[a-z]{1,12}",
            any::<u64>(),
            proptest::option::of("[a-z]{1,6}"),
        )
            .prop_map(|(id, kind, room, channel, from, tenant_id, sequence, command)| Envelope {
                id,
                kind,
                room,
                channel,
                from,
                tenant_id,
                timestamp: "2026-01-01T00:00:00.000Z".to_owned(),
                sequence,
                vector_clock: None,
                version: PROTOCOL_VERSION.to_owned(),
                payload: serde_json::json!({"n": 1, "ok": true}),
                metadata: None,
                trace: None,
                command,
            })
    }

    proptest! {
        /// P2: per-(tenant, room, channel) sequence numbers are contiguous and
        /// strictly increasing regardless of interleaving with other scopes.
        #[test]
        fn sequence_numbers_stay_contiguous_across_arbitrary_scopes(
            keys in prop::collection::vec(scope_key_strategy(), 1..200)
        ) {
            let generator = SequenceGenerator::new();
            let mut expected: HashMap<(String, String, String), u64> = HashMap::new();
            for (tenant, room, channel) in keys {
                let got = generator.next(&tenant, &room, &channel);
                let counter = expected.entry((tenant, room, channel)).or_insert(0);
                *counter += 1;
                prop_assert_eq!(got, *counter);
            }
        }

        /// P7: any envelope that can be constructed survives an encode/decode
        /// round trip unchanged.
        #[test]
        fn envelope_round_trips_through_encode_and_decode(envelope in envelope_strategy()) {
            let bytes = encode(&envelope).map_err(|e| TestCaseError::fail(e.to_string()))?;
            let decoded: Envelope = serde_json::from_slice(&bytes)
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(decoded, envelope);
        }
    }
}
