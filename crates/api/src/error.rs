//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use consolidation::{ConsolidationError, ReprocessError};
use ledger::LedgerError;
use messaging::ChannelError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// A backing store or the broker is temporarily unreachable.
    Unavailable(String),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => {
                tracing::warn!(error = %msg, "dependency unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match &err {
            LedgerError::EntryNotFound(_) => ApiError::NotFound(err.to_string()),
            LedgerError::EntryTypeNotFound(_)
            | LedgerError::InactiveEntryType(_)
            | LedgerError::InvalidEntry(_) => ApiError::BadRequest(err.to_string()),
            _ if err.is_transient() => ApiError::Unavailable(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ConsolidationError> for ApiError {
    fn from(err: ConsolidationError) -> Self {
        match &err {
            ConsolidationError::InvalidRange { .. } => ApiError::BadRequest(err.to_string()),
            _ if err.is_transient() => ApiError::Unavailable(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ReprocessError> for ApiError {
    fn from(err: ReprocessError) -> Self {
        match &err {
            ReprocessError::InvalidRange { .. } => ApiError::BadRequest(err.to_string()),
            ReprocessError::DateFailed { .. } => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ChannelError> for ApiError {
    fn from(err: ChannelError) -> Self {
        match &err {
            ChannelError::Unavailable(_) | ChannelError::Closed | ChannelError::Database(_) => {
                ApiError::Unavailable(err.to_string())
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use common::EntryId;

    use super::*;

    fn status(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn ledger_errors_map_to_status() {
        assert_eq!(
            status(LedgerError::EntryNotFound(EntryId::new(1)).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(LedgerError::EntryTypeNotFound(9).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(LedgerError::Unavailable("down".into()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn invalid_range_is_bad_request() {
        let start = NaiveDate::from_ymd_opt(2024, 4, 2).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        assert_eq!(
            status(ConsolidationError::InvalidRange { start, end }.into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(ReprocessError::InvalidRange { start, end }.into()),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn store_outage_is_service_unavailable() {
        assert_eq!(
            status(ConsolidationError::Unavailable("down".into()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(ChannelError::Closed.into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
