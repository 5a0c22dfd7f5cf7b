//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;

/// State of the broker bridge as reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeStatus {
    /// Connected to the broker.
    Ready,
    /// Configured but not connected; events stay local.
    Degraded,
    /// Not configured.
    Disabled,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: String,
    pub bridge: BridgeStatus,
}

/// GET /health. The process is healthy even when the bridge is degraded.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let bridge = match &state.bridge {
        Some(bridge) if bridge.is_ready() => BridgeStatus::Ready,
        Some(_) => BridgeStatus::Degraded,
        None => BridgeStatus::Disabled,
    };
    Json(HealthResponse {
        status: "ok",
        service: state.bus.service_name().to_string(),
        bridge,
    })
}
