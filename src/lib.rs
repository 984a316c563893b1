// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ArqonBus: a real-time, multi-tenant message bus for structured WebSocket
//! traffic organized by tenant -> room -> channel.

pub mod casil;
pub mod command;
pub mod config;
pub mod envelope;
pub mod error;
pub mod history;
pub mod preflight;
pub mod routing;
pub mod session;
pub mod slow_consumer;
pub mod state;
pub mod storage;
pub mod telemetry;
pub mod tier_omega;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::GatewayConfig;
use crate::state::GatewayState;

/// Run the gateway until shutdown. Binds two listeners: the client
/// WebSocket/HTTP surface and the separate telemetry surface (§4.8, §6).
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    preflight::run(&config).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let addr = format!("{}:{}", config.host, config.port);
    let telemetry_addr = format!("{}:{}", config.host, config.telemetry_port);

    let state = Arc::new(GatewayState::new(config).await?);
    let shutdown = state.shutdown.clone();

    let router = transport::build_router(Arc::clone(&state));
    let telemetry_router = transport::build_telemetry_router(Arc::clone(&state));

    let listener = TcpListener::bind(&addr).await?;
    let telemetry_listener = TcpListener::bind(&telemetry_addr).await?;

    tracing::info!(%addr, %telemetry_addr, "arqonbus-gateway listening");
    slow_consumer::spawn_monitor(Arc::clone(&state));

    let client_shutdown = shutdown.clone();
    let client_server = axum::serve(listener, router)
        .with_graceful_shutdown(async move { client_shutdown.cancelled().await });

    let telemetry_shutdown = shutdown.clone();
    let telemetry_server = axum::serve(telemetry_listener, telemetry_router)
        .with_graceful_shutdown(async move { telemetry_shutdown.cancelled().await });

    let (client_result, telemetry_result) = tokio::join!(client_server, telemetry_server);
    client_result?;
    telemetry_result?;

    state.sessions.cancel_all().await;
    tokio::time::sleep(state.config.drain_timeout()).await;

    Ok(())
}
