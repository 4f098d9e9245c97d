//! Route handler functions.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use copilot_core::{ChatPayload, ChatRequest};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub backend: String,
    pub uptime_secs: u64,
}

/// GET /healthz - health check.
pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: state.assistant.backend_info().name.to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// POST /chat - answer one analytics question.
pub async fn chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatPayload>, ApiError> {
    let Json(request) = body?;
    info!(chars = request.message.chars().count(), "Chat request");
    let payload = state.assistant.answer(&request).await?;
    Ok(Json(payload))
}
