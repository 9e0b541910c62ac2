//! Admin API response envelope.
//!
//! Every admin endpoint answers `{success, data, error, timestamp}` with a
//! stable error code in `error` and an RFC3339 timestamp.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

/// 200 with a data payload.
pub fn ok(data: impl Serialize) -> Response {
    Json(ApiResponse {
        success: true,
        data: serde_json::to_value(data).ok(),
        error: None,
        timestamp: Utc::now().to_rfc3339(),
    })
    .into_response()
}

/// Error with a stable code.
pub fn error_response(status: StatusCode, code: &str) -> Response {
    (
        status,
        Json(ApiResponse {
            success: false,
            data: None,
            error: Some(code.to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }),
    )
        .into_response()
}

/// Error with a stable code plus human-readable detail in `data`.
pub fn error_detail(status: StatusCode, code: &str, detail: &str) -> Response {
    (
        status,
        Json(ApiResponse {
            success: false,
            data: Some(serde_json::json!({ "detail": detail })),
            error: Some(code.to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }),
    )
        .into_response()
}
