//! Local event history endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use event_bus::BusEvent;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub count: usize,
    pub events: Vec<BusEvent>,
}

/// GET /events/history?type=&limit=: most recent events, oldest first.
pub async fn history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 {
        return Err(ApiError::BadRequest("limit must be positive".to_string()));
    }

    let events = state.bus.history(query.event_type.as_deref(), limit);
    Ok(Json(HistoryResponse {
        count: events.len(),
        events,
    }))
}
