//! # Prometheus Metrics
//!
//! Relay health for scraping at `/metrics` on the metrics port. The hub
//! keeps its own counters; every scrape copies them into the Prometheus
//! handles here, so there is no background sampler.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] prefixed
//! `websign_`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use websign_protocol::signaling::{HubStats, RelayHub};

/// Prometheus handles for one relay hub.
pub struct RelayMetrics {
    registry: Registry,
    hub: Arc<RelayHub>,
    /// Open WebSocket connections.
    pub connections: IntGauge,
    /// Topics currently registered.
    pub topics: IntGauge,
    /// Messages handed to a consumer since start.
    pub messages_relayed_total: IntCounter,
    /// Frames answered with an error since start.
    pub relay_errors_total: IntCounter,
}

impl RelayMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new(hub: Arc<RelayHub>) -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("websign".into()), None)?;

        let connections = IntGauge::new("relay_connections", "Open relay WebSocket connections")?;
        registry.register(Box::new(connections.clone()))?;

        let topics = IntGauge::new("relay_topics", "Topics currently registered on the relay")?;
        registry.register(Box::new(topics.clone()))?;

        let messages_relayed_total = IntCounter::new(
            "relay_messages_relayed_total",
            "Messages delivered to a consumer",
        )?;
        registry.register(Box::new(messages_relayed_total.clone()))?;

        let relay_errors_total = IntCounter::new(
            "relay_errors_total",
            "Frames answered with an error (unknown topic, bad frame)",
        )?;
        registry.register(Box::new(relay_errors_total.clone()))?;

        Ok(Self {
            registry,
            hub,
            connections,
            topics,
            messages_relayed_total,
            relay_errors_total,
        })
    }

    /// Copy the hub's counters into the Prometheus handles.
    pub fn record(&self, stats: &HubStats) {
        self.connections.set(stats.connections as i64);
        self.topics.set(stats.topics as i64);
        // Counters only move forward; add whatever the hub gained since
        // the last scrape.
        self.messages_relayed_total
            .inc_by(stats.messages_relayed.saturating_sub(self.messages_relayed_total.get()));
        self.relay_errors_total
            .inc_by(stats.errors.saturating_sub(self.relay_errors_total.get()));
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        self.record(&self.hub.stats());
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<RelayMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

/// The metrics listener's router.
pub fn metrics_router(metrics: SharedMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(metrics)
}
