//! Daily balances, range reports and reprocessing.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::NaiveDate;
use consolidation::{DailyAggregate, RangeSummary, ReprocessTicket};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Serialize)]
pub struct ReprocessAccepted {
    pub status: &'static str,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// GET /balances/{date}: consolidated balance for one day.
pub async fn daily(
    State(state): State<Arc<AppState>>,
    Path(date): Path<NaiveDate>,
) -> Result<Json<DailyAggregate>, ApiError> {
    state
        .balances
        .get_daily_aggregate(date)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No consolidated balance for {date}")))
}

/// GET /balances?start=..&end=..: totals over a date range.
pub async fn range(
    State(state): State<Arc<AppState>>,
    Query(range): Query<DateRange>,
) -> Result<Json<RangeSummary>, ApiError> {
    let summary = state
        .balances
        .get_range_summary(range.start, range.end)
        .await?;
    Ok(Json(summary))
}

/// POST /balances/reprocess: rebuild a date range from the ledger in the background.
#[tracing::instrument(skip(state))]
pub async fn reprocess(
    State(state): State<Arc<AppState>>,
    Json(range): Json<DateRange>,
) -> Result<(StatusCode, Json<ReprocessAccepted>), ApiError> {
    match state.balances.trigger_reprocess(range.start, range.end) {
        ReprocessTicket::Accepted(handle) => {
            let (start, end) = (range.start, range.end);
            tokio::spawn(async move {
                match handle.await {
                    Ok(Ok(report)) => tracing::info!(
                        %start,
                        %end,
                        rebuilt = report.dates_rebuilt.len(),
                        skipped = report.dates_skipped.len(),
                        cancelled = report.cancelled,
                        "reprocess completed"
                    ),
                    Ok(Err(e)) => tracing::error!(error = %e, "reprocess failed"),
                    Err(e) => tracing::error!(error = %e, "reprocess task panicked"),
                }
            });
            Ok((
                StatusCode::ACCEPTED,
                Json(ReprocessAccepted {
                    status: "accepted",
                    start,
                    end,
                }),
            ))
        }
        ReprocessTicket::Rejected(err) => Err(err.into()),
    }
}
