use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{parse_period, AppState};
use crate::domain::{BackgroundJob, StoreId};
use crate::error::AppError;
use crate::orchestration::CommitReceipt;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    pub actor_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub store_ids: Vec<i64>,
    pub actor_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStarted {
    pub job_id: String,
    pub total: usize,
}

pub async fn commit_settlement(
    Path((period, store_id)): Path<(String, i64)>,
    State(state): State<AppState>,
    body: Option<Json<CommitRequest>>,
) -> Result<Json<CommitReceipt>, AppError> {
    let period = parse_period(&period)?;
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let receipt = state
        .committer
        .commit_settlement(StoreId::new(store_id), period, request.actor_id.as_deref())
        .await?;
    Ok(Json(receipt))
}

pub async fn draft_settlement(
    Path((period, store_id)): Path<(String, i64)>,
    State(state): State<AppState>,
    body: Option<Json<CommitRequest>>,
) -> Result<Json<CommitReceipt>, AppError> {
    let period = parse_period(&period)?;
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let receipt = state
        .committer
        .draft_settlement(StoreId::new(store_id), period, request.actor_id.as_deref())
        .await?;
    Ok(Json(receipt))
}

pub async fn start_batch(
    Path(period): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<(StatusCode, Json<BatchStarted>), AppError> {
    let period = parse_period(&period)?;
    let stores = request.store_ids.into_iter().map(StoreId::new).collect();
    let ticket = state
        .batches
        .start(period, stores, request.actor_id)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(BatchStarted {
            job_id: ticket.job_id,
            total: ticket.total,
        }),
    ))
}

pub async fn get_batch(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<BackgroundJob>, AppError> {
    let job = state
        .batches
        .job_status(&job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("settlement batch {job_id}")))?;
    Ok(Json(job))
}
