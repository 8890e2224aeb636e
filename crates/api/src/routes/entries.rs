//! Entry-creation boundary and entry lookup.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::NaiveDate;
use common::{EntryId, Money};
use ledger::{LedgerEntry, LedgerStore, NewEntry};
use messaging::ConsolidationEvent;
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct CreateEntryRequest {
    pub description: String,
    pub entry_type_id: i32,
    /// Positive decimal string, e.g. `"150.50"`.
    pub amount: Money,
    pub date: NaiveDate,
}

/// POST /entries: record a ledger entry and publish its event.
///
/// The response reflects the committed entry only; publication runs detached
/// and its failure never reaches the caller.
#[tracing::instrument(skip(state, req), fields(entry_type_id = req.entry_type_id, date = %req.date))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateEntryRequest>,
) -> Result<(StatusCode, Json<LedgerEntry>), ApiError> {
    let entry = state
        .ledger
        .insert(NewEntry::new(
            req.description,
            req.entry_type_id,
            req.amount,
            req.date,
        ))
        .await?;

    tracing::info!(entry_id = %entry.id, nature = %entry.nature, "entry recorded");
    let _ = state
        .publisher
        .publish_detached(ConsolidationEvent::from(&entry));

    Ok((StatusCode::CREATED, Json(entry)))
}

/// GET /entries/{id}: fetch one ledger entry.
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<LedgerEntry>, ApiError> {
    let id = EntryId::new(id);
    state
        .ledger
        .get_entry(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Entry not found: {id}")))
}
