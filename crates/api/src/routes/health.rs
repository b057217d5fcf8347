use axum::{extract::State, routing::get, Json, Router};
use exec_signing_core::store::DocumentStore;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Health check routes.
pub fn routes<S: DocumentStore>() -> Router<AppState<S>> {
    Router::new()
        .route("/health", get(health_check::<S>))
        .route("/v1/ping", get(ping))
}

/// Full health check: verifies the document store answers.
async fn health_check<S: DocumentStore>(State(state): State<AppState<S>>) -> ApiResult<Json<Value>> {
    state
        .signing()
        .store()
        .ping()
        .await
        .map_err(|e| ApiError::Internal(format!("document store health check failed: {e}")))?;

    Ok(Json(json!({
        "status": "ok",
        "store": "connected",
        "subscribers": state.event_bus().subscriber_count(),
    })))
}

/// Lightweight ping, no store check.
async fn ping() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
