//! HTTP API endpoint handlers.

use axum::Json;

/// Health check endpoint, polled by the directory
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}
