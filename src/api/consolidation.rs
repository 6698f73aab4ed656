use axum::extract::{Path, State};
use axum::Json;

use super::{parse_period, AppState};
use crate::error::AppError;
use crate::orchestration::{ConsolidationReport, IngestionResult};

pub async fn consolidate_period(
    Path(period): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ConsolidationReport>, AppError> {
    let period = parse_period(&period)?;
    let report = state.consolidator.consolidate(period).await?;
    Ok(Json(report))
}

pub async fn ingest_period(
    Path(period): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<IngestionResult>, AppError> {
    let period = parse_period(&period)?;
    let ingestor = state
        .ingestor
        .as_ref()
        .ok_or_else(|| AppError::Unavailable("no record feed configured".into()))?;
    let result = ingestor.ingest_period(period).await?;
    Ok(Json(result))
}
