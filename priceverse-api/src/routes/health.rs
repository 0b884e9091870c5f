//! Plain HTTP health mirrors for orchestrators

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde_json::{json, Value};

use priceverse_core::HealthStatus;

use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let report = state.probe.check().await;
    let code = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (
        code,
        Json(serde_json::to_value(&report).unwrap_or_else(|_| json!({"status": "unknown"}))),
    )
}

async fn liveness() -> &'static str {
    "OK"
}

async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let report = state.probe.check().await;
    match report.status {
        HealthStatus::Unhealthy => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "down"})),
        ),
        _ => (StatusCode::OK, Json(json!({"status": "up"}))),
    }
}
