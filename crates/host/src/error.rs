//! HTTP error type with response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bridge::BridgeError;

/// Error returned by host endpoints.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found (e.g. bridge stats while the bridge is disabled).
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Broker bridge failure.
    Bridge(BridgeError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Bridge(err) => bridge_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn bridge_error_to_response(err: BridgeError) -> (StatusCode, String) {
    match &err {
        BridgeError::Connection(_) | BridgeError::NotConnected | BridgeError::Publish(_) => {
            tracing::warn!(error = %err, "broker unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
        _ => {
            tracing::error!(error = %err, "bridge error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        ApiError::Bridge(err)
    }
}
