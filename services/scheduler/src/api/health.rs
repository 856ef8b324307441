//! Health check endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok" or "unavailable".
    pub status: String,
    pub service: String,
    pub version: String,
    /// Current timestamp (ISO 8601).
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthResponse {
    fn new(status: &str, message: Option<String>) -> Self {
        Self {
            status: status.to_string(),
            service: "kafka-scheduler".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now().to_rfc3339(),
            message,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}

/// Liveness: the server is up.
async fn healthz() -> impl IntoResponse {
    Json(HealthResponse::new("ok", None))
}

/// Readiness: the task store answers.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match state.store().task_names() {
        Ok(_) => (StatusCode::OK, Json(HealthResponse::new("ok", None))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse::new("unavailable", Some(e.to_string()))),
        ),
    }
}
