// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the gateway's HTTP surface.
//!
//! Uses `axum_test::TestServer` — no real TCP needed.

use std::sync::Arc;

use axum_test::TestServer;

use arqonbus::config::{
    AuthConfig, CasilConfig, GatewayConfig, OmegaConfig, Profile, StorageBackend, StorageConfig,
    StorageMode,
};
use arqonbus::state::GatewayState;
use arqonbus::transport::build_router;

fn test_config() -> GatewayConfig {
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

async fn test_state() -> Arc<GatewayState> {
    Arc::new(GatewayState::new(test_config()).await.expect("in-memory state must construct"))
}

fn test_server(state: Arc<GatewayState>) -> TestServer {
    let router = build_router(state);
    TestServer::new(router).expect("failed to create test server")
}

#[tokio::test]
async fn health_reports_ok() -> anyhow::Result<()> {
    let server = test_server(test_state().await);
    let resp = server.get("/health").await;
    resp.assert_status_ok();

    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn status_reports_zero_sessions_on_a_fresh_gateway() -> anyhow::Result<()> {
    let server = test_server(test_state().await);
    let resp = server.get("/status").await;
    resp.assert_status_ok();

    let body: serde_json::Value = resp.json();
    assert_eq!(body["sessions"], 0);
    assert_eq!(body["omega_enabled"], true);
    assert_eq!(body["auth_rejected_total"], 0);
    Ok(())
}

#[tokio::test]
async fn status_counts_rejected_auth_attempts() -> anyhow::Result<()> {
    let state = test_state().await;
    state.record_auth_rejected();
    state.record_auth_rejected();

    let server = test_server(Arc::clone(&state));
    let resp = server.get("/status").await;
    resp.assert_status_ok();

    let body: serde_json::Value = resp.json();
    assert_eq!(body["auth_rejected_total"], 2);
    Ok(())
}

#[tokio::test]
async fn metrics_exposes_prometheus_text() -> anyhow::Result<()> {
    let server = test_server(test_state().await);
    let resp = server.get("/metrics").await;
    resp.assert_status_ok();

    let body = resp.text();
    assert!(body.contains("arqonbus_sessions_active"));
    assert!(body.contains("arqonbus_auth_rejected_total"));
    assert!(body.contains("arqonbus_storage_degraded"));
    Ok(())
}

#[tokio::test]
async fn version_reports_protocol_version() -> anyhow::Result<()> {
    let server = test_server(test_state().await);
    let resp = server.get("/version").await;
    resp.assert_status_ok();

    let body: serde_json::Value = resp.json();
    assert_eq!(body["name"], "arqonbus-gateway");
    assert!(body["protocol_version"].is_number() || body["protocol_version"].is_string());
    Ok(())
}

#[tokio::test]
async fn ws_upgrade_without_auth_header_is_rejected_when_auth_enabled() -> anyhow::Result<()> {
    let mut config = test_config();
    config.auth.enable_auth = true;
    config.auth.jwt_secret = Some("a-suitably-long-test-secret-value".into());
    let state = Arc::new(GatewayState::new(config).await?);

    let server = test_server(state);
    let resp = server.get("/ws").await;
    assert!(resp.status_code().is_client_error());
    Ok(())
}
