use crate::domain::PeriodParseError;
use crate::orchestration::{
    BatchError, CalculationError, ConsolidationError, IngestionError, PreviewError,
    SettlementError,
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<PeriodParseError> for AppError {
    fn from(err: PeriodParseError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<CalculationError> for AppError {
    fn from(err: CalculationError) -> Self {
        match err {
            CalculationError::Period(e) => e.into(),
            CalculationError::Db(e) => e.into(),
        }
    }
}

impl From<ConsolidationError> for AppError {
    fn from(err: ConsolidationError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<IngestionError> for AppError {
    fn from(err: IngestionError) -> Self {
        match err {
            IngestionError::Feed(e) => AppError::Unavailable(e.to_string()),
            IngestionError::Db(e) => e.into(),
        }
    }
}

impl From<PreviewError> for AppError {
    fn from(err: PreviewError) -> Self {
        match err {
            PreviewError::Calculation(e) => e.into(),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        let message = err.to_string();
        match err {
            SettlementError::UnassignedStore => AppError::BadRequest(message),
            SettlementError::UnknownStore(_) => AppError::NotFound(message),
            e if e.is_conflict() => AppError::Conflict(message),
            SettlementError::Calculation(e) => e.into(),
            _ => AppError::Internal(message),
        }
    }
}

impl From<BatchError> for AppError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::NoStores => AppError::BadRequest(err.to_string()),
            _ => AppError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
