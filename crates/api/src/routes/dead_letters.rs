//! Dead-letter queue inspection.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use chrono::{DateTime, Utc};
use messaging::{DeadLetter, DeadLetterReason, EventChannel};
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct DeadLetterResponse {
    pub message_id: String,
    pub reason: DeadLetterReason,
    pub attempts: u32,
    /// Raw body, lossily decoded as UTF-8.
    pub body: String,
    pub published_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
}

impl From<DeadLetter> for DeadLetterResponse {
    fn from(letter: DeadLetter) -> Self {
        Self {
            message_id: letter.message_id.to_string(),
            reason: letter.reason,
            attempts: letter.attempts,
            body: String::from_utf8_lossy(&letter.body).into_owned(),
            published_at: letter.published_at,
            dead_lettered_at: letter.dead_lettered_at,
        }
    }
}

/// GET /dead-letters: messages parked in the dead-letter queue, oldest first.
pub async fn list(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DeadLetterResponse>>, ApiError> {
    let letters = state.channel().dead_letters().await?;
    Ok(Json(letters.into_iter().map(Into::into).collect()))
}
