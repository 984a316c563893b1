// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Preflight & config validation (C9, spec §4.9). Runs once at startup,
//! before the listener binds. Any failure aborts the process.

use crate::casil::policy::PolicySnapshotSpec;
use crate::config::{GatewayConfig, Profile, StorageMode};

#[derive(Debug, Clone)]
pub enum PreflightError {
    WeakSecret,
    MissingSecret,
    MissingStorageUrl,
    CasilSnapshotInvalid(String),
}

impl std::fmt::Display for PreflightError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WeakSecret => write!(f, "ARQONBUS_AUTH_JWT_SECRET is too weak for this profile"),
            Self::MissingSecret => write!(f, "ARQONBUS_AUTH_JWT_SECRET is required outside dev"),
            Self::MissingStorageUrl => write!(f, "storage backend selected but no connection URL configured"),
            Self::CasilSnapshotInvalid(reason) => write!(f, "default CASIL snapshot failed to compile: {reason}"),
        }
    }
}

impl std::error::Error for PreflightError {}

const MIN_SECRET_LEN: usize = 32;

/// Validate profile-gated requirements (§4.9): secret strength outside
/// `dev`, storage URL presence in `strict` mode, CASIL snapshot
/// compilability, and tier-omega flag normalization.
pub fn run(config: &GatewayConfig) -> Result<(), PreflightError> {
    if config.auth.enable_auth && config.profile != Profile::Dev {
        match &config.auth.jwt_secret {
            None => return Err(PreflightError::MissingSecret),
            Some(secret) if secret.len() < MIN_SECRET_LEN || is_default_looking(secret) => {
                return Err(PreflightError::WeakSecret);
            }
            Some(_) => {}
        }
    }

    if config.storage.mode == StorageMode::Strict {
        let has_url = match config.storage.backend {
            crate::config::StorageBackend::Memory => true,
            crate::config::StorageBackend::Valkey => config.storage.valkey_url.is_some(),
            crate::config::StorageBackend::Postgres => config.storage.postgres_url.is_some(),
        };
        if !has_url {
            return Err(PreflightError::MissingStorageUrl);
        }
    }

    compile_default_casil_snapshot(config)?;

    // Tier-omega normalization: caps of zero with the lane enabled is
    // nonsensical but not fatal — callers get FEATURE_DISABLED-equivalent
    // behavior (an always-full lane) rather than a crash, so no check here
    // beyond what TierOmegaLane::new already clamps structurally.

    Ok(())
}

fn is_default_looking(secret: &str) -> bool {
    matches!(secret, "changeme" | "secret" | "development" | "test")
}

fn compile_default_casil_snapshot(config: &GatewayConfig) -> Result<(), PreflightError> {
    let spec = PolicySnapshotSpec::from_config(&config.casil);
    crate::casil::policy::PolicySnapshot::compile(spec)
        .map(|_| ())
        .map_err(|e| PreflightError::CasilSnapshotInvalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, CasilConfig, OmegaConfig, StorageBackend, StorageConfig};

    fn base_config(profile: Profile) -> GatewayConfig {
        GatewayConfig {
            profile,
            host: "127.0.0.1".into(),
            port: 8080,
            telemetry_port: 8081,
            max_connections: 10,
            max_message_size: 1024,
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                mode: StorageMode::Strict,
                valkey_url: None,
                postgres_url: None,
            },
            auth: AuthConfig { enable_auth: true, jwt_secret: None, jwt_algorithm: "HS256".into() },
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
            omega: OmegaConfig { enabled: false, max_substrates: 8, max_events: 8 },
            history_capacity: 500,
            send_queue_capacity: 1000,
            heartbeat_ms: 15_000,
            heartbeat_miss_limit: 3,
            slow_consumer_timeout_ms: 30_000,
            drain_ms: 5_000,
            rate_limit_per_sec: 200,
        }
    }

    #[test]
    fn prod_without_secret_fails() {
        let config = base_config(Profile::Prod);
        let err = run(&config).unwrap_err();
        assert!(matches!(err, PreflightError::MissingSecret));
    }

    #[test]
    fn dev_without_secret_passes() {
        let config = base_config(Profile::Dev);
        run(&config).unwrap();
    }

    #[test]
    fn weak_secret_rejected_in_staging() {
        let mut config = base_config(Profile::Staging);
        config.auth.jwt_secret = Some("changeme".into());
        let err = run(&config).unwrap_err();
        assert!(matches!(err, PreflightError::WeakSecret));
    }

    #[test]
    fn strong_secret_passes_in_prod() {
        let mut config = base_config(Profile::Prod);
        config.auth.jwt_secret = Some("x".repeat(40));
        run(&config).unwrap();
    }

    #[test]
    fn strict_external_backend_without_url_fails() {
        let mut config = base_config(Profile::Prod);
        config.auth.jwt_secret = Some("x".repeat(40));
        config.storage.backend = StorageBackend::Valkey;
        let err = run(&config).unwrap_err();
        assert!(matches!(err, PreflightError::MissingStorageUrl));
    }
}
