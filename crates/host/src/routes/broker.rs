//! Broker bridge endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use bridge::{BridgeStats, BrokerBridge};
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub service: String,
    pub ready: bool,
    /// Outbound messages buffered for batching.
    pub pending: usize,
    pub topic_prefix: Option<String>,
    pub dead_letter_topic: String,
    #[serde(flatten)]
    pub stats: BridgeStats,
}

fn configured(state: &AppState) -> Result<&BrokerBridge, ApiError> {
    state
        .bridge
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("broker bridge is disabled".to_string()))
}

/// GET /bridge/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<StatsResponse>, ApiError> {
    let bridge = configured(&state)?;
    Ok(Json(StatsResponse {
        service: bridge.config().service_name.clone(),
        ready: bridge.is_ready(),
        pending: bridge.pending(),
        topic_prefix: bridge.router().prefix().map(str::to_string),
        dead_letter_topic: bridge.dead_letter_topic().to_string(),
        stats: bridge.stats(),
    }))
}

/// POST /bridge/flush: sends buffered batches now.
pub async fn flush(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    let bridge = configured(&state)?;
    if !bridge.is_ready() {
        return Err(ApiError::Bridge(bridge::BridgeError::NotConnected));
    }
    bridge.flush().await?;
    Ok(StatusCode::NO_CONTENT)
}
