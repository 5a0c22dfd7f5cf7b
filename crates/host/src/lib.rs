//! Process host for the event core.
//!
//! Wires the process-wide [`LocalEventBus`] to an optional [`BrokerBridge`]
//! and exposes an operational HTTP surface: health, Prometheus metrics,
//! bridge statistics and the local event history.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use bridge::{BrokerBridge, TopicAdmin, default_topic_configs};
use event_bus::LocalEventBus;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the HTTP handlers.
pub struct AppState {
    pub bus: LocalEventBus,
    /// `None` when the bridge is disabled by configuration.
    pub bridge: Option<BrokerBridge>,
}

impl AppState {
    pub fn new(bus: LocalEventBus, bridge: Option<BrokerBridge>) -> Self {
        Self { bus, bridge }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/bridge/stats", get(routes::broker::stats))
        .route("/bridge/flush", post(routes::broker::flush))
        .route("/events/history", get(routes::events::history))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Connects the bridge, falling back to local-only operation on failure.
///
/// Returns whether the bridge is connected.
pub async fn connect_or_degrade(bridge: &BrokerBridge) -> bool {
    match bridge.connect().await {
        Ok(()) => {
            tracing::info!(
                service = %bridge.config().service_name,
                brokers = %bridge.config().bootstrap_servers(),
                "broker bridge connected"
            );
            metrics::gauge!("bridge_connected").set(1.0);
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, "broker unavailable, running local-only");
            metrics::gauge!("bridge_connected").set(0.0);
            false
        }
    }
}

/// Creates every topic the bridge routes to, plus its dead-letter topic.
///
/// Returns the topics that were newly created.
pub async fn provision_topics(
    admin: &dyn TopicAdmin,
    bridge: &BrokerBridge,
) -> bridge::Result<Vec<String>> {
    let configs = default_topic_configs(bridge.router(), &bridge.config().dead_letter_topic);
    let created = admin.ensure_topics(&configs).await?;
    tracing::info!(created = created.len(), total = configs.len(), "topics provisioned");
    Ok(created)
}
