use axum::{http::StatusCode, response::Json};
use serde_json::json;

/// Unauthenticated liveness probe.
pub async fn health_check() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "quickdesk",
        })),
    )
}
