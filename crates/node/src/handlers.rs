//! HTTP handlers: health flag and status snapshot.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// Boolean health across all sub-services. Unhealthy reports 503 so load
/// balancers and probes can act on the status code alone.
pub async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<serde_json::Value>) {
    let healthy = state.health.all_healthy();
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(json!({
            "healthy": healthy,
            "services": state.health.snapshot(),
        })),
    )
}

/// Read-only JSON snapshot of wallet, sync and fee state.
pub async fn full_status(State(state): State<AppState>) -> Json<custody::StatusSnapshot> {
    Json(state.snapshot().await)
}
