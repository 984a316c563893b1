// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Startup configuration (C9 preflight surface, spec §6).

use std::time::Duration;

use clap::ValueEnum;

/// Deployment profile. Drives which preflight checks are mandatory (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum Profile {
    Dev,
    Staging,
    Prod,
}

/// Storage backend selection (§6, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Valkey,
    Postgres,
}

/// Storage durability stance (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum StorageMode {
    Strict,
    Degraded,
}

/// Top-level gateway configuration, bound from env vars under the `ARQONBUS_` prefix.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "arqonbus-gateway")]
pub struct GatewayConfig {
    /// Deployment profile; gates mandatory preflight checks.
    #[arg(long, value_enum, default_value = "dev", env = "ARQONBUS_PROFILE")]
    pub profile: Profile,

    /// Host to bind the client WebSocket/HTTP listener on.
    #[arg(long, default_value = "127.0.0.1", env = "ARQONBUS_SERVER_HOST")]
    pub host: String,

    /// Port for the client WebSocket/HTTP listener.
    #[arg(long, default_value_t = 8080, env = "ARQONBUS_SERVER_PORT")]
    pub port: u16,

    /// Port for the separate telemetry WebSocket listener (§4.8).
    #[arg(long, default_value_t = 8081, env = "ARQONBUS_TELEMETRY_PORT")]
    pub telemetry_port: u16,

    /// Maximum concurrent sessions.
    #[arg(long, default_value_t = 10_000, env = "ARQONBUS_MAX_CONNECTIONS")]
    pub max_connections: usize,

    /// Maximum inbound envelope payload size, in bytes.
    #[arg(long, default_value_t = 262_144, env = "ARQONBUS_MAX_MESSAGE_SIZE")]
    pub max_message_size: usize,

    #[command(flatten)]
    pub storage: StorageConfig,

    #[command(flatten)]
    pub auth: AuthConfig,

    #[command(flatten)]
    pub casil: CasilConfig,

    #[command(flatten)]
    pub omega: OmegaConfig,

    /// History ring capacity per (tenant, room, channel).
    #[arg(long, default_value_t = 500, env = "ARQONBUS_HISTORY_CAPACITY")]
    pub history_capacity: usize,

    /// Per-session send queue high-watermark (§4.1).
    #[arg(long, default_value_t = 1_000, env = "ARQONBUS_SEND_QUEUE_CAPACITY")]
    pub send_queue_capacity: usize,

    /// Heartbeat interval (`T_hb`, milliseconds).
    #[arg(long, default_value_t = 15_000, env = "ARQONBUS_HEARTBEAT_MS")]
    pub heartbeat_ms: u64,

    /// Missed heartbeats before a session is closed (`N_hb`).
    #[arg(long, default_value_t = 3, env = "ARQONBUS_HEARTBEAT_MISS_LIMIT")]
    pub heartbeat_miss_limit: u32,

    /// Grace period for slow-consumer backpressure before closing the session.
    #[arg(long, default_value_t = 30_000, env = "ARQONBUS_SLOW_CONSUMER_TIMEOUT_MS")]
    pub slow_consumer_timeout_ms: u64,

    /// Graceful shutdown drain timeout (`T_drain`, milliseconds).
    #[arg(long, default_value_t = 5_000, env = "ARQONBUS_DRAIN_MS")]
    pub drain_ms: u64,

    /// Per-session ingress rate limit, envelopes per second.
    #[arg(long, default_value_t = 200, env = "ARQONBUS_RATE_LIMIT_PER_SEC")]
    pub rate_limit_per_sec: u32,
}

/// Storage adapter configuration (C7).
#[derive(Debug, Clone, clap::Args)]
pub struct StorageConfig {
    #[arg(long, value_enum, default_value = "memory", env = "ARQONBUS_STORAGE_BACKEND")]
    pub backend: StorageBackend,

    #[arg(long, value_enum, default_value = "degraded", env = "ARQONBUS_STORAGE_MODE")]
    pub mode: StorageMode,

    #[arg(long, env = "ARQONBUS_VALKEY_URL")]
    pub valkey_url: Option<String>,

    #[arg(long, env = "ARQONBUS_POSTGRES_URL")]
    pub postgres_url: Option<String>,
}

/// Session/auth edge configuration (C6).
#[derive(Debug, Clone, clap::Args)]
pub struct AuthConfig {
    #[arg(long, default_value_t = true, env = "ARQONBUS_ENABLE_AUTH")]
    pub enable_auth: bool,

    /// HMAC/RSA secret for JWT verification. Must be strong and non-default
    /// outside `dev` (enforced at preflight, §4.9).
    #[arg(long, env = "ARQONBUS_AUTH_JWT_SECRET")]
    pub jwt_secret: Option<String>,

    #[arg(long, default_value = "HS256", env = "ARQONBUS_AUTH_JWT_ALGORITHM")]
    pub jwt_algorithm: String,
}

/// CASIL safety pipeline configuration (C2).
#[derive(Debug, Clone, clap::Args)]
pub struct CasilConfig {
    #[arg(long, default_value_t = true, env = "ARQONBUS_CASIL_ENABLED")]
    pub enabled: bool,

    /// `monitor` or `enforce`.
    #[arg(long, default_value = "enforce", env = "ARQONBUS_CASIL_MODE")]
    pub mode: String,

    /// Comma-separated glob patterns for in-scope `room:channel` pairs.
    #[arg(long, default_value = "*", env = "ARQONBUS_CASIL_SCOPE_INCLUDE")]
    pub scope_include: String,

    #[arg(long, default_value = "", env = "ARQONBUS_CASIL_SCOPE_EXCLUDE")]
    pub scope_exclude: String,

    #[arg(long, default_value_t = 65_536, env = "ARQONBUS_CASIL_MAX_INSPECT_BYTES")]
    pub max_inspect_bytes: usize,

    #[arg(long, default_value_t = true, env = "ARQONBUS_CASIL_BLOCK_ON_PROBABLE_SECRET")]
    pub block_on_probable_secret: bool,

    /// Comma-separated named redaction pattern ids, applied in addition to
    /// the built-in probable-secret patterns.
    #[arg(long, default_value = "", env = "ARQONBUS_CASIL_REDACTION_PATTERNS")]
    pub redaction_patterns: String,

    /// `allow` or `block`; fallback decision on internal pipeline error.
    #[arg(long, default_value = "block", env = "ARQONBUS_CASIL_DEFAULT_DECISION")]
    pub default_decision: String,
}

/// Tier-Omega isolated lane configuration (C10).
#[derive(Debug, Clone, clap::Args)]
pub struct OmegaConfig {
    #[arg(long, default_value_t = false, env = "ARQONBUS_OMEGA_ENABLED")]
    pub enabled: bool,

    #[arg(long, default_value_t = 128, env = "ARQONBUS_OMEGA_MAX_SUBSTRATES")]
    pub max_substrates: usize,

    #[arg(long, default_value_t = 1_000, env = "ARQONBUS_OMEGA_MAX_EVENTS")]
    pub max_events: usize,
}

impl GatewayConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn slow_consumer_timeout(&self) -> Duration {
        Duration::from_millis(self.slow_consumer_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }
}
