//! Unversioned service handlers.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use super::AppState;

/// `GET /health` - liveness plus a database round trip when configured.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match &state.db {
        Some(db) => match db.ping().await {
            Ok(()) => "up",
            Err(_) => "down",
        },
        None => "disabled",
    };

    let healthy = database != "down";
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if healthy { "ok" } else { "degraded" },
            "database": database,
            "plugins": state.manager.list().await.len(),
        })),
    )
}

/// `GET /metrics` - Prometheus exposition.
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed\n".to_string(),
        ),
    }
}
