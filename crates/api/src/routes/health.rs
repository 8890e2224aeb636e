//! Liveness endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use messaging::EventChannel;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Queue the consolidation worker consumes.
    pub queue: String,
    pub dead_letter_queue: String,
}

/// GET /health
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let settings = state.channel().settings();
    Json(HealthResponse {
        status: "ok",
        queue: settings.queue.clone(),
        dead_letter_queue: settings.dead_letter_queue.clone(),
    })
}
