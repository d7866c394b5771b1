//! # Relay Server
//!
//! `websign relay`: the signaling hub on one port, Prometheus on another.
//! Holds nothing but in-flight offers and answers, so a restart only costs
//! the pairings that were mid-handshake.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;

use websign_protocol::signaling::{relay_router, RelayHub};

use crate::cli::RelayArgs;
use crate::metrics::{metrics_router, RelayMetrics};

pub async fn run(args: RelayArgs) -> Result<()> {
    let hub = Arc::new(RelayHub::new());
    let metrics = Arc::new(RelayMetrics::new(hub.clone()).context("failed to register metrics")?);

    let relay_addr = format!("{}:{}", args.bind, args.port);
    let relay_listener = tokio::net::TcpListener::bind(&relay_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {relay_addr}"))?;
    tracing::info!(addr = %relay_addr, "relay listening on /signal");

    let metrics_addr = format!("{}:{}", args.bind, args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {metrics_addr}"))?;
    tracing::info!(addr = %metrics_addr, "metrics listening on /metrics");

    tokio::select! {
        res = axum::serve(relay_listener, relay_router(hub.clone())) => {
            res.context("relay server failed")?;
        }
        res = axum::serve(metrics_listener, metrics_router(metrics)) => {
            res.context("metrics server failed")?;
        }
        _ = shutdown_signal() => {
            let stats = hub.stats();
            tracing::info!(
                connections = stats.connections,
                topics = stats.topics,
                "shutdown signal received, dropping open connections"
            );
        }
    }

    tracing::info!("relay stopped");
    Ok(())
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. If a handler can't be
/// installed, that signal is simply never observed.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
